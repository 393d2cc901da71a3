//! 块设备接口层
//!
//! 每一种块设备 (虚拟盘, 软盘, 硬盘 ...) 只需要提供一个能力:
//! 处理请求队列头部的那个请求. 请求队列的维护, 缓冲块的解锁和请求项的回收
//! 都由 [`super::BlockLayer`] 统一完成, 设备驱动不需要关心.
//!
//! 泛用性: 块设备表按主设备号保存 `Arc<dyn BlockDevice>`, 分发时不需要知道具体的设备类型.

use std::any::Any;

use super::ActiveRequest;

/// 设备对一次 `service` 调用的答复
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Service {
    /// 请求已经同步完成, 参数表示数据是否有效 (uptodate)
    Done(bool),
    /// 暂时性的介质错误: 请求的出错计数加一, 达到 MAX_ERRORS 后以失败结束, 否则重新处理
    Retry,
    /// 请求已经交给硬件, 完成时由中断路径调用 `BlockLayer::complete`
    Pending,
}

// 设备驱动层
// 定义设备驱动需要实现的请求处理接口 BlockDevice trait

pub trait BlockDevice: Send + Sync + Any {
    // service 处理当前请求 req: 读请求把设备上的数据拷贝到 req.bh,
    // 写请求把 req.bh 的数据写到设备上.
    // 调用时请求队列的锁已经释放, 可以在这里做耗时的拷贝.
    fn service(&self, req: &ActiveRequest) -> Service;
}
