//! 预定义的常用通知

use crate::advice::{IntroductionInterceptor, MethodInterceptor, ThrowsAdvice};
use crate::error::Result;
use crate::error_info::ErrorInfo;
use crate::invocation::MethodInvocation;
use crate::joinpoint::{JoinPoint, ReturnValue};
use crate::target::Target;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 跟踪拦截器 - 记录方法的进入与退出
#[derive(Debug, Clone, Default)]
pub struct TraceInterceptor {
    log_args: bool,
}

impl TraceInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同时记录参数类型
    pub fn with_args(mut self) -> Self {
        self.log_args = true;
        self
    }
}

#[async_trait]
impl MethodInterceptor for TraceInterceptor {
    fn name(&self) -> &str {
        "TraceInterceptor"
    }

    async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
        let signature = invocation.join_point().signature();
        if self.log_args {
            tracing::debug!("→ Entering: {} {:?}", signature, invocation.arguments());
        } else {
            tracing::debug!("→ Entering: {}", signature);
        }

        let result = invocation.proceed().await;
        match &result {
            Ok(value) => tracing::debug!(
                "← Exiting: {} -> {} (took {:?})",
                signature,
                value.type_name(),
                invocation.elapsed()
            ),
            Err(error) => tracing::debug!(
                "← Exiting: {} with error '{}' (took {:?})",
                signature,
                error,
                invocation.elapsed()
            ),
        }
        result
    }
}

/// 性能监控拦截器
pub struct PerformanceMonitorInterceptor {
    threshold: Duration,
    slow_calls: AtomicUsize,
}

impl PerformanceMonitorInterceptor {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            slow_calls: AtomicUsize::new(0),
        }
    }

    /// 超过阈值的调用次数
    pub fn slow_calls(&self) -> usize {
        self.slow_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MethodInterceptor for PerformanceMonitorInterceptor {
    fn name(&self) -> &str {
        "PerformanceMonitorInterceptor"
    }

    async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
        // 只计下游耗时，不含外层拦截器已花费的时间
        let start = Instant::now();
        let result = invocation.proceed().await;
        let elapsed = start.elapsed();
        if elapsed > self.threshold {
            self.slow_calls.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "⚠️ Slow method detected: {} took {}ms (threshold: {}ms)",
                invocation.join_point().signature(),
                elapsed.as_millis(),
                self.threshold.as_millis()
            );
        }
        result
    }
}

/// 异常日志通知
#[derive(Debug, Default)]
pub struct ExceptionLoggingAdvice {
    logged: AtomicUsize,
}

impl ExceptionLoggingAdvice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logged(&self) -> usize {
        self.logged.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ThrowsAdvice for ExceptionLoggingAdvice {
    async fn after_throwing(&self, join_point: &JoinPoint<'_>, error: &anyhow::Error) {
        let info = ErrorInfo::from_anyhow(error);
        self.logged.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            "❌ Exception in {}: {}",
            join_point.signature(),
            info.full_description()
        );
    }
}

/// 委托式引入拦截器
///
/// 声明在被引入接口上的方法交给委托对象执行，其它方法继续调用链。
pub struct DelegatingIntroductionInterceptor {
    delegate: Arc<dyn Target>,
    interfaces: Vec<&'static str>,
}

impl DelegatingIntroductionInterceptor {
    pub fn new(
        delegate: Arc<dyn Target>,
        interfaces: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        Self {
            delegate,
            interfaces: interfaces.into_iter().collect(),
        }
    }

    /// 以委托对象类型上声明的全部接口作为引入接口
    pub fn for_delegate(delegate: Arc<dyn Target>) -> Self {
        let interfaces = delegate.target_class().interfaces().to_vec();
        Self {
            delegate,
            interfaces,
        }
    }
}

#[async_trait]
impl MethodInterceptor for DelegatingIntroductionInterceptor {
    fn name(&self) -> &str {
        "DelegatingIntroductionInterceptor"
    }

    async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
        if self.implements_interface(invocation.method().declaring_type()) {
            tracing::trace!(
                "Delegating introduced method {} to {}",
                invocation.method(),
                self.delegate.target_class()
            );
            return self
                .delegate
                .invoke(invocation.method(), invocation.arguments())
                .await;
        }
        invocation.proceed().await
    }
}

impl IntroductionInterceptor for DelegatingIntroductionInterceptor {
    fn interfaces(&self) -> &[&'static str] {
        &self.interfaces
    }
}
