//! 缓冲区: 在内存中缓存磁盘块的数据, 是块设备层的上层调用者
//!
//! 一个缓冲块 [`BufferHead`] 除了 1024 字节的数据之外还带有三个标志:
//!
//! - lock: 缓冲块正在做 I/O. 只有块设备层会设置/清除它, 其他人只能读或者等待
//! - dirt: 缓冲块被修改过, 还没有写回磁盘
//! - uptodate: 缓冲块里的数据和磁盘一致 (读成功或者写成功之后置位)
//!
//! 缓冲区管理器 [`BufferCache`] 沿用类 FIFO 的替换算法:
//! 新读入的块从队尾加入, 需要替换时从队头找第一个没有被外部引用的块换出去.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use spin::{Mutex, MutexGuard};

use super::{major, BlockLayer, Command, WaitQueue, BLOCK_SIZE, NR_BUFFERS};

pub struct BufferHead {
    /// 缓冲块来自哪个设备
    dev: u16,
    /// 缓冲块在设备上的块号
    blocknr: u32,
    /// 1024 字节的数据区
    data: Mutex<[u8; BLOCK_SIZE]>,
    lock: AtomicBool,
    dirt: AtomicBool,
    uptodate: AtomicBool,
    /// 等待这个缓冲块解锁的上下文
    pub(super) wait: WaitQueue,
}

impl BufferHead {
    pub fn new(dev: u16, blocknr: u32) -> Self {
        Self {
            dev,
            blocknr,
            data: Mutex::new([0u8; BLOCK_SIZE]),
            lock: AtomicBool::new(false),
            dirt: AtomicBool::new(false),
            uptodate: AtomicBool::new(false),
            wait: WaitQueue::new(),
        }
    }

    pub fn dev(&self) -> u16 {
        self.dev
    }

    pub fn major(&self) -> usize {
        major(self.dev)
    }

    pub fn blocknr(&self) -> u32 {
        self.blocknr
    }

    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirt.load(Ordering::Acquire)
    }

    pub fn is_uptodate(&self) -> bool {
        self.uptodate.load(Ordering::Acquire)
    }

    /// 只能在块设备层的临界区里调用
    pub(super) fn set_locked(&self, locked: bool) {
        self.lock.store(locked, Ordering::Release);
    }

    pub(super) fn set_dirty(&self, dirty: bool) {
        self.dirt.store(dirty, Ordering::Release);
    }

    pub fn set_uptodate(&self, uptodate: bool) {
        self.uptodate.store(uptodate, Ordering::Release);
    }

    /// 以只读方式访问数据区
    pub fn read<V>(&self, f: impl FnOnce(&[u8; BLOCK_SIZE]) -> V) -> V {
        f(&*self.data.lock())
    }

    /// 修改数据区, 同时把缓冲块标记为脏, 之后需要写回磁盘
    pub fn modify<V>(&self, f: impl FnOnce(&mut [u8; BLOCK_SIZE]) -> V) -> V {
        let v = f(&mut *self.data.lock());
        self.set_dirty(true);
        v
    }

    /// 设备驱动直接访问数据区, 不改动任何标志
    pub fn data(&self) -> MutexGuard<'_, [u8; BLOCK_SIZE]> {
        self.data.lock()
    }
}

/// 缓冲区管理器
///
/// 当我们要对一个磁盘块进行读写时, 首先看它是否已经在缓冲区中了,
/// 如果在的话直接返回, 否则分配一个新的缓冲块, 必要时替换掉一个旧的.
/// 缓冲块的 I/O 全部通过 [`BlockLayer::submit`] 完成.
pub struct BufferCache {
    layer: Arc<BlockLayer>,
    /// 队列中的缓冲块按加入的先后排列
    queue: Mutex<VecDeque<Arc<BufferHead>>>,
}

impl BufferCache {
    pub fn new(layer: Arc<BlockLayer>) -> Self {
        Self {
            layer,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn layer(&self) -> &Arc<BlockLayer> {
        &self.layer
    }

    fn lookup(&self, dev: u16, block: u32) -> Option<Arc<BufferHead>> {
        self.queue
            .lock()
            .iter()
            .find(|bh| bh.dev() == dev && bh.blocknr() == block)
            .map(Arc::clone)
    }

    /// 取得 (dev, block) 对应的缓冲块, 不做任何 I/O (除了写回被替换出去的脏块)
    pub fn getblk(&self, dev: u16, block: u32) -> Arc<BufferHead> {
        if let Some(bh) = self.lookup(dev, block) {
            return bh;
        }
        let victim = {
            let mut queue = self.queue.lock();
            if queue.len() < NR_BUFFERS {
                None
            } else {
                // 从队头往后找第一个只被管理器自己引用的缓冲块.
                // 正在做 I/O 的缓冲块被请求项引用着, 强引用计数一定大于 1.
                let idx = queue
                    .iter()
                    .position(|bh| Arc::strong_count(bh) == 1 && !bh.is_locked());
                match idx {
                    Some(idx) => queue.remove(idx),
                    None => panic!("Run out of BufferHead"),
                }
            }
        };
        // 被替换出去的脏块要先写回, 这时不能持有队列的锁
        if let Some(victim) = victim {
            if victim.is_dirty() {
                self.layer.submit(Command::Write, &victim);
                self.layer.wait_on_buffer(&victim);
            }
        }
        let mut queue = self.queue.lock();
        // 写回期间别人可能已经把这个块放进来了
        if let Some(bh) = queue
            .iter()
            .find(|bh| bh.dev() == dev && bh.blocknr() == block)
        {
            return Arc::clone(bh);
        }
        let bh = Arc::new(BufferHead::new(dev, block));
        queue.push_back(Arc::clone(&bh));
        bh
    }

    /// 读一个块, 读失败返回 None
    pub fn bread(&self, dev: u16, block: u32) -> Option<Arc<BufferHead>> {
        let bh = self.getblk(dev, block);
        if bh.is_uptodate() {
            return Some(bh);
        }
        self.layer.submit(Command::Read, &bh);
        self.layer.wait_on_buffer(&bh);
        if bh.is_uptodate() {
            return Some(bh);
        }
        self.brelse(bh);
        None
    }

    /// 读 first 块, 顺便对 rest 中的块发出预读请求.
    /// 预读只是建议, 缓冲块忙或者请求项不够时会被丢弃.
    pub fn breada(&self, dev: u16, first: u32, rest: &[u32]) -> Option<Arc<BufferHead>> {
        let bh = self.getblk(dev, first);
        if !bh.is_uptodate() {
            self.layer.submit(Command::Read, &bh);
        }
        for &block in rest {
            let tmp = self.getblk(dev, block);
            if !tmp.is_uptodate() {
                self.layer.submit(Command::ReadAhead, &tmp);
            }
            self.brelse(tmp);
        }
        self.layer.wait_on_buffer(&bh);
        if bh.is_uptodate() {
            return Some(bh);
        }
        self.brelse(bh);
        None
    }

    /// 把脏的缓冲块写回磁盘并等待完成, 返回缓冲块是否有效
    pub fn bwrite(&self, bh: &Arc<BufferHead>) -> bool {
        self.layer.submit(Command::Write, bh);
        self.layer.wait_on_buffer(bh);
        bh.is_uptodate()
    }

    /// 释放缓冲块: 先等它的 I/O 结束, 再放弃这份引用
    pub fn brelse(&self, bh: Arc<BufferHead>) {
        self.layer.wait_on_buffer(&bh);
        drop(bh);
    }

    /// 把设备 dev 上所有的脏块写回
    pub fn sync_dev(&self, dev: u16) {
        let dirty: Vec<_> = self
            .queue
            .lock()
            .iter()
            .filter(|bh| bh.dev() == dev && bh.is_dirty())
            .map(Arc::clone)
            .collect();
        for bh in dirty.iter() {
            self.layer.submit(Command::Write, bh);
        }
        for bh in dirty.iter() {
            self.layer.wait_on_buffer(bh);
        }
    }
}
