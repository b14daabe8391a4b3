//! 通知（Advice）定义
//!
//! 定义了在连接点执行的各种动作。可直接执行的通知是 [`MethodInterceptor`]；
//! 其余通知类型（前置、返回后、异常、后置以及自定义类型）由
//! [`AdvisorAdapterRegistry`](crate::adapter::AdvisorAdapterRegistry) 转换为拦截器。

use crate::error::Result;
use crate::invocation::MethodInvocation;
use crate::joinpoint::{type_names_match, JoinPoint, ReturnValue};
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceType {
    /// 前置通知
    Before,
    /// 后置通知（无论成功还是失败都执行）
    After,
    /// 返回后通知（成功返回时执行）
    AfterReturning,
    /// 异常通知（抛出异常时执行）
    AfterThrowing,
    /// 环绕通知（可以控制方法执行）
    Around,
    /// 引入通知（为目标增加新的能力）
    Introduction,
    /// 由注册的适配器识别的自定义通知
    Custom(&'static str),
}

impl fmt::Display for AdviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdviceType::Custom(kind) => write!(f, "Custom({})", kind),
            other => write!(f, "{:?}", other),
        }
    }
}

/// 方法拦截器
///
/// 通知的统一可执行形式。实现者通过 [`MethodInvocation::proceed`] 把调用交给链上的
/// 下一个元素；不调用 `proceed` 即短路目标方法。
#[async_trait]
pub trait MethodInterceptor: Send + Sync {
    /// 拦截器名称（用于日志）
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue>;
}

/// 前置通知
///
/// 在目标方法执行前调用；返回错误会中止调用并原样传播给调用方。
#[async_trait]
pub trait MethodBeforeAdvice: Send + Sync {
    async fn before(&self, join_point: &JoinPoint<'_>) -> Result<()>;
}

/// 返回后通知
///
/// 在目标方法成功返回后调用，可以观察返回值但不能替换它。
#[async_trait]
pub trait AfterReturningAdvice: Send + Sync {
    async fn after_returning(&self, join_point: &JoinPoint<'_>, result: &ReturnValue)
        -> Result<()>;
}

/// 异常通知
///
/// 在目标方法失败时调用，只能观察错误，错误随后原样继续传播。
#[async_trait]
pub trait ThrowsAdvice: Send + Sync {
    async fn after_throwing(&self, join_point: &JoinPoint<'_>, error: &anyhow::Error);
}

/// 后置通知
///
/// 无论成功还是失败都会执行
#[async_trait]
pub trait AfterAdvice: Send + Sync {
    async fn after(&self, join_point: &JoinPoint<'_>);
}

/// 引入拦截器
///
/// 为被代理对象增加 `interfaces()` 中列出的接口。对这些接口上的方法调用由拦截器
/// 自行处理，其它调用应当继续 `proceed`。
pub trait IntroductionInterceptor: MethodInterceptor {
    fn interfaces(&self) -> &[&'static str];

    fn implements_interface(&self, interface: &str) -> bool {
        self.interfaces()
            .iter()
            .any(|candidate| type_names_match(candidate, interface))
    }
}

/// 自定义通知
///
/// 只有注册了相应 [`AdvisorAdapter`](crate::adapter::AdvisorAdapter) 的注册表才能执行它。
#[derive(Clone)]
pub struct CustomAdvice {
    kind: &'static str,
    advice: Arc<dyn Any + Send + Sync>,
}

impl CustomAdvice {
    pub fn new<T: Any + Send + Sync>(kind: &'static str, advice: T) -> Self {
        Self {
            kind,
            advice: Arc::new(advice),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.advice.downcast_ref::<T>()
    }

    /// 以共享指针取回具体的通知对象
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.advice).downcast::<T>().ok()
    }
}

/// 通知
///
/// 不可变，创建后通过 `Arc` 在顾问之间共享。
#[derive(Clone)]
pub enum Advice {
    Around(Arc<dyn MethodInterceptor>),
    Before(Arc<dyn MethodBeforeAdvice>),
    AfterReturning(Arc<dyn AfterReturningAdvice>),
    AfterThrowing(Arc<dyn ThrowsAdvice>),
    After(Arc<dyn AfterAdvice>),
    Introduction(Arc<dyn IntroductionInterceptor>),
    Custom(CustomAdvice),
}

impl Advice {
    pub fn around(interceptor: impl MethodInterceptor + 'static) -> Self {
        Advice::Around(Arc::new(interceptor))
    }

    pub fn before(advice: impl MethodBeforeAdvice + 'static) -> Self {
        Advice::Before(Arc::new(advice))
    }

    pub fn after_returning(advice: impl AfterReturningAdvice + 'static) -> Self {
        Advice::AfterReturning(Arc::new(advice))
    }

    pub fn after_throwing(advice: impl ThrowsAdvice + 'static) -> Self {
        Advice::AfterThrowing(Arc::new(advice))
    }

    pub fn after(advice: impl AfterAdvice + 'static) -> Self {
        Advice::After(Arc::new(advice))
    }

    pub fn introduction(interceptor: impl IntroductionInterceptor + 'static) -> Self {
        Advice::Introduction(Arc::new(interceptor))
    }

    pub fn custom<T: Any + Send + Sync>(kind: &'static str, advice: T) -> Self {
        Advice::Custom(CustomAdvice::new(kind, advice))
    }

    /// 获取通知类型
    pub fn advice_type(&self) -> AdviceType {
        match self {
            Advice::Around(_) => AdviceType::Around,
            Advice::Before(_) => AdviceType::Before,
            Advice::AfterReturning(_) => AdviceType::AfterReturning,
            Advice::AfterThrowing(_) => AdviceType::AfterThrowing,
            Advice::After(_) => AdviceType::After,
            Advice::Introduction(_) => AdviceType::Introduction,
            Advice::Custom(custom) => AdviceType::Custom(custom.kind),
        }
    }

    /// 是否已经是可以直接执行的拦截器
    pub fn is_interceptor(&self) -> bool {
        matches!(self, Advice::Around(_) | Advice::Introduction(_))
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Advice({})", self.advice_type())
    }
}
