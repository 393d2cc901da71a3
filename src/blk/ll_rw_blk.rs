//! 块设备层: 处理所有对块设备的读写请求
//!
//! 上层 (缓冲区) 只通过 [`BlockLayer::submit`] 发起读写. 一次读写的过程是:
//!
//! 1. 给缓冲块加锁
//! 2. 从请求项数组中分配一个请求项并填好
//! 3. 用电梯算法把请求项插入设备的请求队列
//! 4. 如果队列原来是空的, 立刻调用设备的处理函数; 否则等设备处理完前面的请求再轮到它
//! 5. 设备处理完一个请求后解锁缓冲块, 唤醒等待者, 回收请求项, 接着处理下一个
//!
//! 调用者在 submit 返回后并不知道 I/O 是否已经完成,
//! 它通过等待缓冲块解锁 ([`BlockLayer::wait_on_buffer`]) 来等待完成,
//! 然后检查缓冲块的 uptodate 标志判断成功与否.
//!
//! 关中断的临界区用 `tables` 这把互斥锁表示: 请求项的分配, 缓冲块锁标志的检查与设置,
//! 请求队列的修改都在这把锁里完成. 设备做数据拷贝时从不持有这把锁,
//! 打印日志也放到离开临界区之后.

use std::sync::{
    atomic::{AtomicU16, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use log::{debug, error, warn};

use super::{
    in_order, strictly_before, ActiveRequest, BlockDevice, BufferHead, Command, RequestPool,
    Service, WaitQueue, MAX_ERRORS, NR_BLK_DEV,
};

/// 块设备表中的一项
#[derive(Default)]
struct DeviceEntry {
    /// 请求处理函数, None 表示设备没有挂接
    request_fn: Option<Arc<dyn BlockDevice>>,
    /// 请求队列的头, 也就是设备正在处理的请求. None 表示设备空闲
    current_request: Option<usize>,
}

/// 受 "关中断" 保护的所有共享状态
struct Tables {
    requests: RequestPool,
    blk_dev: [DeviceEntry; NR_BLK_DEV],
}

impl Tables {
    /// 队列头部请求的快照, 顺便检查队列有没有被破坏
    fn current(&self, major: usize) -> Option<ActiveRequest> {
        let slot = self.blk_dev[major].current_request?;
        let req = &self.requests[slot];
        let dev = match req.dev {
            Some(dev) if super::major(dev) == major => dev,
            _ => panic!("blk_dev[{}]: request list destroyed", major),
        };
        let bh = match &req.bh {
            Some(bh) if bh.is_locked() => Arc::clone(bh),
            _ => panic!("blk_dev[{}]: block not locked", major),
        };
        Some(ActiveRequest {
            slot,
            dev,
            cmd: req.cmd,
            errors: req.errors,
            sector: req.sector,
            nr_sectors: req.nr_sectors,
            bh,
        })
    }

    /// 把请求项 slot 插入 major 设备的请求队列.
    /// 队列原来为空时 slot 成为当前请求, 返回 true, 调用者负责启动设备.
    fn add_request(&mut self, major: usize, slot: usize) -> bool {
        self.requests[slot].next = None;
        // 数据已经交给请求项了, 缓冲块不再是脏的
        if let Some(bh) = &self.requests[slot].bh {
            bh.set_dirty(false);
        }
        let Some(head) = self.blk_dev[major].current_request else {
            self.blk_dev[major].current_request = Some(slot);
            return true;
        };
        // 电梯算法: 找到第一对相邻的请求 (tmp, next), 使新请求可以插在它们之间.
        // 条件是新请求排在 next 之前, 并且要么新请求排在 tmp 之后,
        // 要么 tmp 到 next 是一次折返 (扇区号从大跳回小).
        // 和 next 扇区相同时排在它后面.
        let mut tmp = head;
        while let Some(next) = self.requests[tmp].next {
            let r = &self.requests;
            if (in_order(&r[tmp], &r[slot]) || !in_order(&r[tmp], &r[next]))
                && strictly_before(&r[slot], &r[next])
            {
                break;
            }
            tmp = next;
        }
        self.requests[slot].next = self.requests[tmp].next;
        self.requests[tmp].next = Some(slot);
        false
    }
}

/// 块设备层, 整个内核生命周期里只有一个
pub struct BlockLayer {
    tables: Mutex<Tables>,
    /// 请求项用完时在这里等待
    wait_for_request: WaitQueue,
    /// 根文件系统所在的设备号
    root_dev: AtomicU16,
}

impl BlockLayer {
    /// 所有请求项都是空闲的, 所有设备都还没有挂接
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                requests: RequestPool::new(),
                blk_dev: Default::default(),
            }),
            wait_for_request: WaitQueue::new(),
            root_dev: AtomicU16::new(0),
        }
    }

    /// 进入临界区 (关中断)
    fn cli(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 把设备的请求处理函数挂接到块设备表上
    pub fn register(&self, major: usize, device: Arc<dyn BlockDevice>) {
        if major >= NR_BLK_DEV {
            panic!("register: bad major number {}", major);
        }
        self.cli().blk_dev[major].request_fn = Some(device);
    }

    pub fn root_dev(&self) -> u16 {
        self.root_dev.load(Ordering::Acquire)
    }

    pub fn set_root_dev(&self, dev: u16) {
        self.root_dev.store(dev, Ordering::Release);
    }

    /// 给缓冲块加锁. 缓冲块已经被锁住时睡眠, 醒来后重新检查.
    pub fn lock_buffer(&self, bh: &BufferHead) {
        let mut tables = self.cli();
        while bh.is_locked() {
            tables = bh.wait.sleep_on(tables);
        }
        bh.set_locked(true);
    }

    /// 给缓冲块解锁并唤醒所有等待者
    pub fn unlock_buffer(&self, bh: &BufferHead) {
        let was_locked = {
            let _tables = self.cli();
            unlock_locked(bh)
        };
        if !was_locked {
            report_not_locked(bh);
        }
    }

    /// 等待缓冲块解锁, 但不占有它
    pub fn wait_on_buffer(&self, bh: &BufferHead) {
        let mut tables = self.cli();
        while bh.is_locked() {
            tables = bh.wait.sleep_on(tables);
        }
    }

    /// 读写块设备的唯一入口.
    ///
    /// 设备不存在时只打印错误, 缓冲块保持原样 (不会被锁住).
    /// 返回时请求已经排进队列, 但不一定已经完成.
    pub fn submit(&self, rw: Command, bh: &Arc<BufferHead>) {
        let major = bh.major();
        if major >= NR_BLK_DEV || self.cli().blk_dev[major].request_fn.is_none() {
            error!("Trying to read nonexistent block-device {:04x}", bh.dev());
            return;
        }
        self.make_request(major, rw, bh);
    }

    fn make_request(&self, major: usize, rw: Command, bh: &Arc<BufferHead>) {
        // 预读/预写不是必须的: 缓冲块正忙就算了, 否则当作普通读写
        let rw_ahead = rw.is_ahead();
        if rw_ahead && bh.is_locked() {
            return;
        }
        let rw = rw.plain();
        self.lock_buffer(bh);
        if (rw == Command::Write && !bh.is_dirty()) || (rw == Command::Read && bh.is_uptodate()) {
            self.unlock_buffer(bh);
            return;
        }
        let mut tables = self.cli();
        // 醒来之后只重新分配请求项, 不再检查缓冲块的状态
        let slot = loop {
            if let Some(slot) = tables.requests.allocate_slot(rw, bh) {
                break slot;
            }
            if rw_ahead {
                let was_locked = unlock_locked(bh);
                drop(tables);
                if !was_locked {
                    report_not_locked(bh);
                }
                return;
            }
            tables = self.wait_for_request.sleep_on(tables);
        };
        let was_idle = tables.add_request(major, slot);
        drop(tables);
        debug!(
            "{:?} dev {:04x} block {} -> request {}",
            rw,
            bh.dev(),
            bh.blocknr(),
            slot
        );
        // 队列原来是空的: 立刻让设备开始处理
        if was_idle {
            self.do_request(major);
        }
    }

    /// 让 major 设备从队列头开始处理请求. 队列为空时什么也不做.
    ///
    /// 只能在设备空闲时由刚把请求放进空队列的上下文调用,
    /// 设备处理到一半时再次进入会让同一个请求被处理两次.
    pub fn do_request(&self, major: usize) {
        let (device, first) = {
            let tables = self.cli();
            (tables.blk_dev[major].request_fn.clone(), tables.current(major))
        };
        let Some(device) = device else {
            panic!("do_request: no request function for major {}", major);
        };
        self.run(major, device.as_ref(), first);
    }

    /// 中断路径: 设备报告当前请求完成, 结束它并继续处理队列中剩下的请求
    pub fn complete(&self, major: usize, uptodate: bool) {
        let device = self.cli().blk_dev[major].request_fn.clone();
        let Some(device) = device else {
            panic!("complete: no request function for major {}", major);
        };
        let next = self.end_request(major, None, uptodate);
        self.run(major, device.as_ref(), next);
    }

    /// 处理, 完成, 前进, 再处理, 直到队列为空或者设备要等硬件中断.
    ///
    /// 只有让设备从空闲变为忙碌的那个上下文 (或者报告完成的中断路径) 会进入这里,
    /// 所以同一个设备不会被两个上下文同时处理.
    fn run(&self, major: usize, device: &dyn BlockDevice, mut next: Option<ActiveRequest>) {
        while let Some(mut req) = next {
            next = match device.service(&req) {
                Service::Done(uptodate) => self.end_request(major, Some(req.slot), uptodate),
                Service::Retry => {
                    req.errors = self.bump_errors(major, req.slot);
                    if req.errors >= MAX_ERRORS {
                        self.end_request(major, Some(req.slot), false)
                    } else {
                        warn!(
                            "dev {:04x} sector {}: retry {}",
                            req.dev, req.sector, req.errors
                        );
                        Some(req)
                    }
                }
                Service::Pending => return,
            };
        }
    }

    fn bump_errors(&self, major: usize, slot: usize) -> u32 {
        let mut tables = self.cli();
        if tables.blk_dev[major].current_request != Some(slot) {
            panic!("blk_dev[{}]: request {} is not the current request", major, slot);
        }
        tables.requests[slot].errors += 1;
        tables.requests[slot].errors
    }

    /// 结束当前请求: 设置 uptodate, 解锁缓冲块, 唤醒等待者, 回收请求项,
    /// 然后把队列推进到下一个请求并返回它.
    ///
    /// expected 是驱动正在处理的请求项, 它必须还是队列头. 中断路径不知道下标, 传 None.
    fn end_request(
        &self,
        major: usize,
        expected: Option<usize>,
        uptodate: bool,
    ) -> Option<ActiveRequest> {
        let mut tables = self.cli();
        let Some(slot) = tables.blk_dev[major].current_request else {
            panic!("end_request: blk_dev[{}] has no current request", major);
        };
        if let Some(expected) = expected.filter(|&expected| expected != slot) {
            panic!(
                "end_request: blk_dev[{}] finished request {} but {} is current",
                major, expected, slot
            );
        }
        let req = &mut tables.requests[slot];
        let finished = req.bh.take();
        let was_locked = match &finished {
            Some(bh) => {
                bh.set_uptodate(uptodate);
                unlock_locked(bh)
            }
            None => true,
        };
        req.waiting.wake_up();
        self.wait_for_request.wake_up();
        let next = req.next;
        tables.requests.release(slot);
        tables.blk_dev[major].current_request = next;
        let head = tables.current(major);
        drop(tables);

        if let Some(bh) = finished {
            if !was_locked {
                report_not_locked(&bh);
            }
            if !uptodate {
                error!("I/O error in dev {:04x}, block {}", bh.dev(), bh.blocknr());
            }
        }
        head
    }

    /// 正在使用的请求项
    pub fn busy_slots(&self) -> Vec<usize> {
        self.cli().requests.busy()
    }

    /// major 设备请求队列中各请求的起始扇区, 按队列顺序
    pub fn queued_sectors(&self, major: usize) -> Vec<u32> {
        let tables = self.cli();
        let mut sectors = Vec::new();
        let mut cur = tables.blk_dev[major].current_request;
        while let Some(slot) = cur {
            sectors.push(tables.requests[slot].sector);
            cur = tables.requests[slot].next;
        }
        sectors
    }

    pub fn is_idle(&self, major: usize) -> bool {
        self.cli().blk_dev[major].current_request.is_none()
    }
}

impl Default for BlockLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// 解锁缓冲块, 调用者必须已经在临界区里. 返回解锁前缓冲块是否真的锁着.
fn unlock_locked(bh: &BufferHead) -> bool {
    let was_locked = bh.is_locked();
    bh.set_locked(false);
    bh.wait.wake_up();
    was_locked
}

/// 重复解锁只说明内部状态不一致, 打印出来继续运行
fn report_not_locked(bh: &BufferHead) {
    error!(
        "ll_rw_blk: buffer not locked (dev {:04x}, block {})",
        bh.dev(),
        bh.blocknr()
    );
}
