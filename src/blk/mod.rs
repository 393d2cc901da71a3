mod block_dev;
mod buffer;
mod ll_rw_blk;
mod ramdisk;
mod request;
mod super_block;
mod wait;

extern crate log;

/// 逻辑块大小: 缓冲区/文件系统以 1024 字节为单位读写
pub const BLOCK_SIZE: usize = 1024;
/// log2(BLOCK_SIZE)
pub const BLOCK_SIZE_BITS: usize = 10;
/// 扇区大小: 块设备随机读写的物理单位
pub const SECTOR_SIZE: usize = 512;
/// 一个逻辑块占用的扇区数
pub const SECTORS_PER_BLOCK: u32 = (BLOCK_SIZE / SECTOR_SIZE) as u32;
/// 请求项数组的容量. 写请求只能使用前 2/3, 最后 1/3 留给读请求
pub const NR_REQUEST: usize = 32;
/// 块设备主设备号的个数 (blk_dev 表的长度)
pub const NR_BLK_DEV: usize = 7;
/// 缓冲区能同时驻留的缓冲块个数
pub const NR_BUFFERS: usize = 64;
/// 一个请求连续出错多少次之后放弃
pub const MAX_ERRORS: u32 = 7;

/// 虚拟盘 (内存盘)
pub const RAMDISK_MAJOR: usize = 1;
/// 软盘
pub const FLOPPY_MAJOR: usize = 2;
/// 硬盘
pub const HD_MAJOR: usize = 3;
/// 虚拟盘的设备号 0x0101: 主设备号 1, 次设备号 1
pub const RAMDISK_DEV: u16 = 0x0101;
/// 根文件系统映像在软盘上的起始块号 (前面是 bootsect, setup 和 system 模块)
pub const RAMDISK_IMAGE_BLOCK: u32 = 256;
/// Magic number of a minix v1 superblock
pub const SUPER_MAGIC: u16 = 0x137f;

/// 设备号的高 8 位是主设备号
pub const fn major(dev: u16) -> usize {
    (dev >> 8) as usize
}

/// 设备号的低 8 位是次设备号
pub const fn minor(dev: u16) -> u8 {
    (dev & 0xff) as u8
}

pub const fn mkdev(major: usize, minor: u8) -> u16 {
    ((major as u16) << 8) | minor as u16
}

pub use block_dev::{BlockDevice, Service};
pub use buffer::{BufferCache, BufferHead};
pub use ll_rw_blk::BlockLayer;
pub use ramdisk::RamDisk;
pub use request::{in_order, strictly_before, ActiveRequest, Command, RequestPool};
pub use super_block::SuperBlock;
pub use wait::WaitQueue;
