//! Chimera Intercept - 方法拦截引擎
//!
//! 为被代理对象的每次方法调用解析出一条有序的拦截链并执行：
//! - 顾问（Advisor）= 通知 + 适用条件（切点、引入或无条件）
//! - 适配器注册表把各种通知统一转换为 [`MethodInterceptor`]
//! - 静态匹配结果按（方法，目标类型）缓存，运行时匹配在每次调用时重新判断
//! - 通过 `#[proxied]` 宏为 trait 生成类型安全的代理
//!
//! ```ignore
//! use chimera_intercept::prelude::*;
//!
//! #[proxied]
//! #[async_trait]
//! pub trait Repo: Send + Sync {
//!     async fn save(&self, name: String) -> anyhow::Result<u64>;
//! }
//!
//! let factory = ProxyFactory::new(RepoTarget::new(MemoryRepo::default()));
//! factory.add_advisor(Advisor::pointcut(
//!     "tx",
//!     Pointcut::method_names(["save*"])?,
//!     Advice::around(TxInterceptor),
//! ))?;
//! let repo = RepoProxy::new(factory.get_proxy()?);
//! repo.save("a".to_string()).await?;
//! ```

pub mod adapter;
pub mod advice;
pub mod advisor;
pub mod auto_proxy;
pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod error_info;
pub mod expression;
pub mod factory;
pub mod interceptors;
pub mod invocation;
pub mod joinpoint;
pub mod logging;
pub mod pointcut;
pub mod proxy;
pub mod target;

// 重新导出核心类型
pub use adapter::{AdvisorAdapter, AdvisorAdapterRegistry};
pub use advice::{
    Advice, AdviceType, AfterAdvice, AfterReturningAdvice, CustomAdvice, IntroductionInterceptor,
    MethodBeforeAdvice, MethodInterceptor, ThrowsAdvice,
};
pub use advisor::{
    sort_advisors, Advisor, IntroductionAdvisor, PlainAdvisor, PointcutAdvisor,
    HIGHEST_PRECEDENCE, LOWEST_PRECEDENCE,
};
pub use auto_proxy::{AdvisorRegistration, AutoProxyCreator};
pub use cache::{ChainCache, MethodCacheKey};
pub use chain::{AdvisorChainFactory, DefaultAdvisorChainFactory, InterceptorChainEntry};
pub use config::{InterceptConfig, ProxyConfig, DEFAULT_ENV_PREFIX};
pub use error::{AopError, AopResult, Result};
pub use error_info::ErrorInfo;
pub use expression::PointcutExpression;
pub use factory::{AdvisedSupport, ProxyFactory};
pub use invocation::MethodInvocation;
pub use joinpoint::{Arguments, ClassInfo, JoinPoint, Method, ReturnValue};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use pointcut::{ClassFilter, MethodMatcher, Pointcut};
pub use proxy::{AopContext, Proxy, ProxyContext, ProxyContextGuard};
pub use target::{
    EmptyTargetSource, PrototypeTargetSource, SingletonTargetSource, Target, TargetSource,
};

// 导出供宏生成代码使用
pub use async_trait;
pub use inventory;

pub use chimera_intercept_macros::proxied;

/// 预导入模块
pub mod prelude {
    pub use crate::advice::*;
    pub use crate::advisor::{Advisor, IntroductionAdvisor, HIGHEST_PRECEDENCE, LOWEST_PRECEDENCE};
    pub use crate::auto_proxy::{AdvisorRegistration, AutoProxyCreator};
    pub use crate::config::InterceptConfig;
    pub use crate::error::{AopError, AopResult};
    pub use crate::error_info::ErrorInfo;
    pub use crate::expression::PointcutExpression;
    pub use crate::factory::ProxyFactory;
    pub use crate::interceptors::*;
    pub use crate::invocation::MethodInvocation;
    pub use crate::joinpoint::{Arguments, ClassInfo, JoinPoint, Method, ReturnValue};
    pub use crate::pointcut::Pointcut;
    pub use crate::proxy::{AopContext, Proxy, ProxyContext};
    pub use crate::target::Target;
    pub use crate::proxied;
    pub use async_trait::async_trait;
}
