use crate::blk::{ActiveRequest, BlockDevice, Command, Service, SECTOR_SIZE};
use log::warn;
use spin::Mutex;
use std::io::{self, Read, Seek, SeekFrom, Write};

// 用宿主机上的一个文件模拟一块真实的磁盘 (软盘/硬盘), 为它实现 BlockDevice 接口.
// 注意 File 本身仅通过 read/write 接口是不能实现随机读写的,
// 在访问一个特定的扇区的时候, 我们必须先 seek 到这个扇区的开头位置.
//
// 任何实现了 Read + Write + Seek 的类型都可以充当磁盘, 测试里用的是 Cursor<Vec<u8>>.
pub struct BlockFile<F>(pub Mutex<F>);

impl<F> BlockFile<F> {
    pub fn new(file: F) -> Self {
        Self(Mutex::new(file))
    }
}

impl<F: Read + Write + Seek> BlockFile<F> {
    fn transfer(&self, req: &ActiveRequest) -> io::Result<()> {
        let mut file = self.0.lock();
        let len = req.nr_sectors as usize * SECTOR_SIZE;
        file.seek(SeekFrom::Start(req.sector as u64 * SECTOR_SIZE as u64))?;
        match req.cmd {
            // 读取扇区到缓冲块
            Command::Read => file.read_exact(&mut req.bh.data()[..len]),
            // 把缓冲块写到扇区
            Command::Write => file.write_all(&req.bh.data()[..len]),
            cmd => panic!("unknown disk command {:?}", cmd),
        }
    }
}

impl<F: Read + Write + Seek + Send + 'static> BlockDevice for BlockFile<F> {
    /// 同步完成请求; 宿主机 I/O 出错时让设备层重试
    fn service(&self, req: &ActiveRequest) -> Service {
        match self.transfer(req) {
            Ok(()) => Service::Done(true),
            Err(err) => {
                warn!("dev {:04x} sector {}: {}", req.dev, req.sector, err);
                Service::Retry
            }
        }
    }
}
