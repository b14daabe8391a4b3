//! 错误信息结构
//!
//! 为异常通知提供错误的结构化视图，不消耗原始错误

use crate::error::AopError;
use std::error::Error;
use std::fmt;

/// 结构化的错误信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// 错误消息
    pub message: String,

    /// 错误类型名称
    pub error_type: String,

    /// 错误源链（cause chain），不含错误本身
    pub source_chain: Vec<String>,

    /// 是否为拦截引擎自身的错误（配置/解析问题），而不是目标方法的错误
    pub engine_error: bool,
}

impl ErrorInfo {
    /// 从具体错误类型创建
    pub fn from_error<E: Error + 'static>(error: &E) -> Self {
        let mut source_chain = Vec::new();
        let mut current_source = error.source();
        while let Some(source) = current_source {
            source_chain.push(source.to_string());
            current_source = source.source();
        }

        Self {
            message: error.to_string(),
            error_type: std::any::type_name::<E>().to_string(),
            source_chain,
            engine_error: (error as &(dyn Error + 'static)).is::<AopError>(),
        }
    }

    /// 从调用链中传播的 `anyhow::Error` 创建
    ///
    /// anyhow 不保留具体类型名，引擎错误会被识别出来，其余记为 `anyhow::Error`。
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        let engine_error = error.downcast_ref::<AopError>().is_some();
        let error_type = if engine_error {
            std::any::type_name::<AopError>()
        } else {
            "anyhow::Error"
        };

        Self {
            message: error.to_string(),
            error_type: error_type.to_string(),
            source_chain: error.chain().skip(1).map(ToString::to_string).collect(),
            engine_error,
        }
    }

    /// 只包含消息的错误信息
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: "Unknown".to_string(),
            source_chain: Vec::new(),
            engine_error: false,
        }
    }

    /// 获取完整的错误描述（包含源链）
    pub fn full_description(&self) -> String {
        if self.source_chain.is_empty() {
            self.message.clone()
        } else {
            format!(
                "{}\nCaused by:\n  {}",
                self.message,
                self.source_chain.join("\n  ")
            )
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.error_type)
    }
}
