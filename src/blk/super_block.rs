//! 磁盘上的超级块
//!
//! 虚拟盘加载程序只关心文件系统映像的第 1 块 (超级块) 中的三个字段:
//! 魔数 (判断映像是否存在), 区段数和 log2(每区段块数) (计算映像的大小).
//!
//! 超级块在磁盘上的布局 (小端序):
//!
//! | 偏移 | 字段 | 类型 |
//! |------|------|------|
//! | 0  | ninodes | u16 |
//! | 2  | nzones | u16 |
//! | 4  | imap_blocks | u16 |
//! | 6  | zmap_blocks | u16 |
//! | 8  | firstdatazone | u16 |
//! | 10 | log_zone_size | u16 |
//! | 12 | max_size | u32 |
//! | 16 | magic | u16 |

use std::fmt::{Debug, Formatter, Result};

use super::SUPER_MAGIC;

#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SuperBlock {
    pub ninodes: u16,
    pub nzones: u16,
    pub imap_blocks: u16,
    pub zmap_blocks: u16,
    pub firstdatazone: u16,
    pub log_zone_size: u16,
    pub max_size: u32,
    magic: u16, // 用于文件系统合法性验证的魔数
}

impl Debug for SuperBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_struct("SuperBlock")
            .field("magic", &format_args!("{:#x}", self.magic))
            .field("ninodes", &self.ninodes)
            .field("nzones", &self.nzones)
            .field("log_zone_size", &self.log_zone_size)
            .field("max_size", &self.max_size)
            .finish()
    }
}

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

impl SuperBlock {
    /// 从一个块的数据中解析出超级块. data 至少要有 18 字节.
    pub fn parse(data: &[u8]) -> Self {
        Self {
            ninodes: u16_at(data, 0),
            nzones: u16_at(data, 2),
            imap_blocks: u16_at(data, 4),
            zmap_blocks: u16_at(data, 6),
            firstdatazone: u16_at(data, 8),
            log_zone_size: u16_at(data, 10),
            max_size: u32_at(data, 12),
            magic: u16_at(data, 16),
        }
    }

    /// 创建一个合法的超级块, 其余字段清零
    pub fn new(nzones: u16, log_zone_size: u16) -> Self {
        Self {
            nzones,
            log_zone_size,
            magic: SUPER_MAGIC,
            ..Default::default()
        }
    }

    /// 按磁盘布局写进 data 的开头
    pub fn write_to(&self, data: &mut [u8]) {
        data[0..2].copy_from_slice(&self.ninodes.to_le_bytes());
        data[2..4].copy_from_slice(&self.nzones.to_le_bytes());
        data[4..6].copy_from_slice(&self.imap_blocks.to_le_bytes());
        data[6..8].copy_from_slice(&self.zmap_blocks.to_le_bytes());
        data[8..10].copy_from_slice(&self.firstdatazone.to_le_bytes());
        data[10..12].copy_from_slice(&self.log_zone_size.to_le_bytes());
        data[12..16].copy_from_slice(&self.max_size.to_le_bytes());
        data[16..18].copy_from_slice(&self.magic.to_le_bytes());
    }

    /// is_valid 可以通过魔数判断超级块所在的文件系统是否合法
    pub fn is_valid(&self) -> bool {
        self.magic == SUPER_MAGIC
    }

    /// 映像一共占多少个块: 区段数 << log2(每区段块数)
    pub fn block_count(&self) -> u64 {
        // 移位超过 48 位会把 u16 的高位移出 u64, 当作无穷大
        if self.log_zone_size as u32 > u64::BITS - u16::BITS {
            return u64::MAX;
        }
        (self.nzones as u64) << self.log_zone_size
    }
}
