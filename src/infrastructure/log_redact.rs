//! 日志脱敏工具
//! 地址与交易数据在日志中只显示首尾，信封与私钥永不进入日志

use ethers::types::Address;

/// 脱敏地址（显示前6位和后4位）
pub fn redact_address(address: &Address) -> String {
    let full = format!("{:?}", address);
    let prefix = &full[..6];
    let suffix = &full[full.len() - 4..];
    format!("{}...{}", prefix, suffix)
}
