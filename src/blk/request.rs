//! 请求项与请求项数组
//!
//! 每个请求项 [`Request`] 描述一次对块设备的读写: 哪个设备, 从哪个扇区开始,
//! 读写多少个扇区, 数据放在哪个缓冲块里.
//!
//! 所有请求项都放在一个固定大小的数组 [`RequestPool`] 里, 这是块设备层唯一的分配器.
//! 请求在设备队列中的先后顺序用 `next` 下标串起来, 而不是用指针:
//! 队列只决定遍历顺序, 请求项本身始终归数组所有.

use std::{
    ops::{Index, IndexMut},
    sync::Arc,
};

use super::{minor, BufferHead, WaitQueue, NR_REQUEST, SECTORS_PER_BLOCK};

/// 读写命令
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Command {
    Read,
    Write,
    /// 预读: 缓冲块被锁住或者请求项用完时直接放弃
    ReadAhead,
    /// 预写: 同上
    WriteAhead,
}

impl Command {
    /// 预读/预写不是必须完成的操作
    pub fn is_ahead(self) -> bool {
        matches!(self, Command::ReadAhead | Command::WriteAhead)
    }

    /// 去掉 "预" 的属性, 得到真正要排队的命令
    pub fn plain(self) -> Command {
        match self {
            Command::Read | Command::ReadAhead => Command::Read,
            Command::Write | Command::WriteAhead => Command::Write,
        }
    }
}

/// 原始命令编码: READ = 0, WRITE = 1, READA = 2, WRITEA = 3.
/// 其它编码不是合法的块设备命令.
impl TryFrom<u32> for Command {
    type Error = u32;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Command::Read),
            1 => Ok(Command::Write),
            2 => Ok(Command::ReadAhead),
            3 => Ok(Command::WriteAhead),
            bad => Err(bad),
        }
    }
}

pub struct Request {
    /// 设备号, None 表示这个请求项是空闲的
    pub(super) dev: Option<u16>,
    pub(super) cmd: Command,
    pub(super) errors: u32,
    /// 起始扇区
    pub(super) sector: u32,
    pub(super) nr_sectors: u32,
    /// 请求对应的缓冲块, 只在请求排队或者正在处理时有效
    pub(super) bh: Option<Arc<BufferHead>>,
    /// 等待这个请求完成的上下文
    pub(super) waiting: WaitQueue,
    /// 同一设备队列中的下一个请求
    pub(super) next: Option<usize>,
}

impl Request {
    fn free() -> Self {
        Self {
            dev: None,
            cmd: Command::Read,
            errors: 0,
            sector: 0,
            nr_sectors: 0,
            bh: None,
            waiting: WaitQueue::new(),
            next: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.dev.is_none()
    }
}

/// 电梯算法的比较函数: 先按设备号, 再按扇区号. 扇区号相等也算有序.
pub fn in_order(a: &Request, b: &Request) -> bool {
    a.dev < b.dev || (a.dev == b.dev && a.sector <= b.sector)
}

/// 严格在前: 扇区号相等时不算, 相同扇区的请求因此按到达顺序排队
pub fn strictly_before(a: &Request, b: &Request) -> bool {
    a.dev < b.dev || (a.dev == b.dev && a.sector < b.sector)
}

pub struct RequestPool {
    slots: [Request; NR_REQUEST],
}

impl RequestPool {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Request::free()),
        }
    }

    /// 找一个空闲请求项并填好它, 返回下标.
    ///
    /// 读请求从数组末尾往前找, 写请求从 2/3 处往前找,
    /// 所以最后 1/3 只有读请求能用: 写请求再多也不会把读请求饿死.
    /// 找不到返回 None, 由调用者决定是放弃还是睡眠等待.
    pub fn allocate_slot(&mut self, rw: Command, bh: &Arc<BufferHead>) -> Option<usize> {
        let start = match rw.plain() {
            Command::Read => NR_REQUEST,
            _ => NR_REQUEST * 2 / 3,
        };
        let slot = (0..start).rev().find(|&i| self.slots[i].is_free())?;
        let req = &mut self.slots[slot];
        req.dev = Some(bh.dev());
        req.cmd = rw.plain();
        req.errors = 0;
        // 一个逻辑块等于两个扇区
        req.sector = bh.blocknr() * SECTORS_PER_BLOCK;
        req.nr_sectors = SECTORS_PER_BLOCK;
        req.bh = Some(Arc::clone(bh));
        req.next = None;
        Some(slot)
    }

    /// 归还请求项
    pub fn release(&mut self, slot: usize) {
        let req = &mut self.slots[slot];
        req.dev = None;
        req.bh = None;
        req.next = None;
    }

    /// 正在使用的请求项下标
    pub fn busy(&self) -> Vec<usize> {
        (0..NR_REQUEST).filter(|&i| !self.slots[i].is_free()).collect()
    }
}

impl Default for RequestPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for RequestPool {
    type Output = Request;

    fn index(&self, slot: usize) -> &Request {
        &self.slots[slot]
    }
}

impl IndexMut<usize> for RequestPool {
    fn index_mut(&mut self, slot: usize) -> &mut Request {
        &mut self.slots[slot]
    }
}

/// 设备驱动看到的当前请求.
///
/// 它是队列头部请求项的一份快照, 拿着它处理请求时不需要持有请求队列的锁.
#[derive(Clone)]
pub struct ActiveRequest {
    pub slot: usize,
    pub dev: u16,
    pub cmd: Command,
    pub errors: u32,
    pub sector: u32,
    pub nr_sectors: u32,
    pub bh: Arc<BufferHead>,
}

impl ActiveRequest {
    pub fn minor(&self) -> u8 {
        minor(self.dev)
    }
}
