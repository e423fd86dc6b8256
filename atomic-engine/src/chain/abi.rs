//! ABI 编码工具
//!
//! 步骤和视图调用都以人类可读签名描述，这里负责解析签名并编码调用数据

use alloy::dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier};
use alloy::json_abi::Function;
use alloy::primitives::{Bytes, U256};

use crate::chain::ChainError;

/// 从签名中截取函数名（`approve(address,uint256)` -> `approve`）
pub fn function_name(signature: &str) -> &str {
    let trimmed = signature.trim();
    let trimmed = trimmed.strip_prefix("function ").unwrap_or(trimmed);
    match trimmed.find('(') {
        Some(idx) => trimmed[..idx].trim(),
        None => trimmed,
    }
}

/// 解析函数签名
pub fn parse_function(signature: &str) -> Result<Function, ChainError> {
    Function::parse(signature)
        .map_err(|e| ChainError::Encoding(format!("无效的函数签名 '{}': {}", signature, e)))
}

/// 编码调用数据（selector + 参数）
pub fn encode_call(signature: &str, args: &[String]) -> Result<Bytes, ChainError> {
    let function = parse_function(signature)?;

    if function.inputs.len() != args.len() {
        return Err(ChainError::Encoding(format!(
            "{} 需要 {} 个参数，实际提供 {} 个",
            function.name,
            function.inputs.len(),
            args.len()
        )));
    }

    let values = function
        .inputs
        .iter()
        .zip(args)
        .map(|(param, raw)| {
            let ty: DynSolType = param
                .resolve()
                .map_err(|e| ChainError::Encoding(format!("无法解析参数类型 {}: {}", param.ty, e)))?;
            ty.coerce_str(raw)
                .map_err(|e| ChainError::Encoding(format!("参数 '{}' 不是合法的 {}: {}", raw, param.ty, e)))
        })
        .collect::<Result<Vec<DynSolValue>, ChainError>>()?;

    let data = function
        .abi_encode_input(&values)
        .map_err(|e| ChainError::Encoding(e.to_string()))?;

    Ok(Bytes::from(data))
}

/// 将返回数据的第一个字解释为 uint256
pub fn decode_uint_word(data: &[u8]) -> Result<U256, ChainError> {
    if data.len() < 32 {
        return Err(ChainError::Encoding(format!(
            "返回数据长度不足: {} 字节",
            data.len()
        )));
    }
    Ok(U256::from_be_slice(&data[..32]))
}
