//! 错误定义
//!
//! 引擎自身的配置/解析错误使用 [`AopError`]；目标方法与拦截器抛出的错误统一使用
//! `anyhow::Error`，在调用链中原样传播，调用方可以通过 `downcast_ref` 取回原始错误类型。

/// 拦截引擎错误
///
/// 这些错误表示配置或装配问题（例如未知的通知类型、非法的切点表达式），
/// 应当被视为启动期缺陷，而不是可以重试的运行时状况。
#[derive(Debug, thiserror::Error)]
pub enum AopError {
    #[error("Unknown advice type '{advice_type}' in advisor '{advisor}': no registered adapter supports it")]
    UnknownAdviceType {
        advisor: String,
        advice_type: String,
    },

    #[error("Invalid pointcut expression '{expression}': {reason}")]
    InvalidPointcut { expression: String, reason: String },

    #[error("Cannot modify advisor configuration: configuration is frozen")]
    ConfigFrozen,

    #[error("Advisor index {index} is out of bounds (advisor count: {count})")]
    AdvisorIndexOutOfBounds { index: usize, count: usize },

    #[error("Advisor '{0}' not found")]
    AdvisorNotFound(String),

    #[error("Invalid introduction advisor '{advisor}': {reason}")]
    InvalidIntroduction { advisor: String, reason: String },

    #[error("No target available for method '{0}'")]
    NoTarget(String),

    #[error("Method '{method}' is not implemented by target '{target}'")]
    NoSuchMethod { method: String, target: String },

    #[error("Argument mismatch for '{method}' at index {index}: {reason}")]
    ArgumentMismatch {
        method: String,
        index: usize,
        reason: String,
    },

    #[error("Return value of type '{actual}' cannot be downcast to '{expected}'")]
    ReturnTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),
}

/// 引擎操作的结果类型
pub type AopResult<T> = std::result::Result<T, AopError>;

/// 目标方法及拦截器的结果类型
///
/// 与 Chimera 其它模块一致，使用 anyhow 作为统一的错误类型。
pub use anyhow::Result;
