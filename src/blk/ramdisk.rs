//! 虚拟盘: 用一段预留的内存充当块设备
//!
//! 虚拟盘的请求总是同步完成的: 处理一个请求就是一次内存拷贝,
//! 所以它的 service 总是立即返回 [`Service::Done`], 设备层会接着处理队列中的下一个请求.
//!
//! 启动时如果根设备是软盘, 并且软盘上第 256 块开始放着一个文件系统映像,
//! [`RamDisk::load`] 会把整个映像拷贝到虚拟盘里, 然后把根设备改成虚拟盘.

use std::sync::Arc;

use log::{error, info, warn};
use spin::Mutex;

use super::{
    major, ActiveRequest, BlockDevice, BlockLayer, BufferCache, Command, Service, SuperBlock,
    BLOCK_SIZE, BLOCK_SIZE_BITS, FLOPPY_MAJOR, RAMDISK_DEV, RAMDISK_IMAGE_BLOCK, RAMDISK_MAJOR,
    SECTOR_SIZE,
};

pub struct RamDisk {
    /// 虚拟盘占用的内存, 长度在初始化之后不再改变
    region: Mutex<Vec<u8>>,
    length: usize,
}

impl RamDisk {
    /// 预留 length 字节内存并清零, 把虚拟盘挂接到块设备表上
    pub fn init(layer: &BlockLayer, length: usize) -> Arc<Self> {
        let ramdisk = Arc::new(Self {
            region: Mutex::new(vec![0u8; length]),
            length,
        });
        layer.register(RAMDISK_MAJOR, ramdisk.clone());
        ramdisk
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// 虚拟盘能容纳多少个块
    pub fn blocks(&self) -> usize {
        self.length >> BLOCK_SIZE_BITS
    }

    /// 把虚拟盘 offset 处的数据拷贝到 out
    pub fn read_region(&self, offset: usize, out: &mut [u8]) {
        out.copy_from_slice(&self.region.lock()[offset..offset + out.len()]);
    }

    /// 把根设备上的文件系统映像加载到虚拟盘, 成功后根设备变为虚拟盘.
    ///
    /// 软盘上没有映像 (魔数不对) 不算错误, 直接返回, 根设备保持不变.
    pub fn load(&self, cache: &BufferCache) {
        if self.length == 0 {
            return;
        }
        info!("Ram disk: {} bytes", self.length);
        let layer = cache.layer();
        let root = layer.root_dev();
        if major(root) != FLOPPY_MAJOR {
            return;
        }
        let mut block = RAMDISK_IMAGE_BLOCK;
        // 映像的第 0 块是引导块, 第 1 块是超级块, 顺便预读前后两块
        let Some(bh) = cache.breada(root, block + 1, &[block, block + 2]) else {
            error!("Disk error while looking for ramdisk!");
            return;
        };
        let sb = bh.read(|data| SuperBlock::parse(data));
        cache.brelse(bh);
        if !sb.is_valid() {
            // No ram disk image present, assume normal floppy boot
            return;
        }
        let mut nblocks = sb.block_count();
        if nblocks > self.blocks() as u64 {
            warn!(
                "Ram disk image too big!  ({} blocks, {} avail)",
                nblocks,
                self.blocks()
            );
            return;
        }
        info!("Loading {} bytes into ram disk...", nblocks << BLOCK_SIZE_BITS);
        let mut offset = 0;
        while nblocks > 0 {
            let bh = if nblocks > 2 {
                cache.breada(root, block, &[block + 1, block + 2])
            } else {
                cache.bread(root, block)
            };
            let Some(bh) = bh else {
                error!("I/O error on block {}, aborting load", block);
                return;
            };
            bh.read(|data| {
                self.region.lock()[offset..offset + BLOCK_SIZE].copy_from_slice(data)
            });
            cache.brelse(bh);
            offset += BLOCK_SIZE;
            block += 1;
            nblocks -= 1;
        }
        info!("Ram disk loaded, {} blocks", offset >> BLOCK_SIZE_BITS);
        layer.set_root_dev(RAMDISK_DEV);
    }
}

impl BlockDevice for RamDisk {
    fn service(&self, req: &ActiveRequest) -> Service {
        let addr = req.sector as usize * SECTOR_SIZE;
        let len = req.nr_sectors as usize * SECTOR_SIZE;
        // 次设备号不对或者越界: 请求失败, 不碰任何内存
        if req.minor() != 1 || addr + len > self.length || len > BLOCK_SIZE {
            return Service::Done(false);
        }
        let mut region = self.region.lock();
        let area = &mut region[addr..addr + len];
        match req.cmd {
            Command::Write => area.copy_from_slice(&req.bh.data()[..len]),
            Command::Read => req.bh.data()[..len].copy_from_slice(area),
            cmd => panic!("unknown ramdisk-command {:?}", cmd),
        }
        Service::Done(true)
    }
}
