//! 内核日志: 给 log 门面提供一个输出到控制台的后端
//!
//! 每一行带有本地时间, 自启动以来的时间, 日志级别和模块名.

use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use log::{LevelFilter, Log, Metadata, Record};

struct KernelLogger {
    boot: DateTime<Local>,
}

lazy_static! {
    static ref LOGGER: KernelLogger = KernelLogger { boot: Local::now() };
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = Local::now();
        let uptime = now.signed_duration_since(self.boot);
        eprintln!(
            "{} [{:>5}.{:03}] {:<5} {}: {}",
            now.format("%H:%M:%S"),
            uptime.num_seconds(),
            uptime.num_milliseconds() % 1000,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// 安装日志后端. 重复调用只会调整日志级别
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&*LOGGER);
    log::set_max_level(level);
}
