//! 等待队列: sleep_on / wake_up
//!
//! 在真实内核中, 进程调用 sleep_on 把自己挂到某个等待队列上并让出 CPU,
//! 之后由中断处理或者其他进程调用 wake_up 唤醒队列上的 **所有** 进程.
//!
//! 这里的执行上下文是宿主机上的线程, 所以等待队列用 [`Condvar`] 实现.
//! 关中断 (cli) 对应的是 [`super::BlockLayer`] 持有的那把互斥锁,
//! 所有等待队列都必须配合这把锁使用: 检查条件和挂起必须在同一个临界区里完成,
//! 否则在 "检查" 和 "睡眠" 之间到来的 wake_up 会丢失.

use std::sync::{Condvar, MutexGuard, PoisonError};

pub struct WaitQueue(Condvar);

impl WaitQueue {
    pub const fn new() -> Self {
        Self(Condvar::new())
    }

    /// 释放 guard 所代表的临界区并睡眠, 被唤醒后重新进入临界区.
    ///
    /// 醒来并不代表等待的条件已经成立(可能有别的上下文抢先一步, 也可能是伪唤醒),
    /// 调用者必须在循环里重新检查条件.
    pub fn sleep_on<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.0.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// 唤醒队列上的所有上下文
    pub fn wake_up(&self) {
        self.0.notify_all();
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
