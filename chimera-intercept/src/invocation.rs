//! 方法调用（拦截链执行器）
//!
//! [`MethodInvocation`] 持有一次调用的全部状态，拦截器通过 [`MethodInvocation::proceed`]
//! 把调用交给链上的下一个元素，链走完后调用目标方法。

use crate::chain::InterceptorChainEntry;
use crate::error::{AopError, Result};
use crate::joinpoint::{Arguments, ClassInfo, JoinPoint, Method, ReturnValue};
use crate::proxy::Proxy;
use crate::target::Target;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 一次被拦截的方法调用
pub struct MethodInvocation {
    proxy: Option<Proxy>,
    target: Option<Arc<dyn Target>>,
    method: Method,
    arguments: Arguments,
    target_class: ClassInfo,
    chain: Arc<[InterceptorChainEntry]>,
    /// 下一个待执行的链元素位置
    index: usize,
    started_at: Instant,
    attributes: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl MethodInvocation {
    pub fn new(
        method: Method,
        arguments: Arguments,
        target: Option<Arc<dyn Target>>,
        target_class: ClassInfo,
        chain: impl Into<Arc<[InterceptorChainEntry]>>,
    ) -> Self {
        Self {
            proxy: None,
            target,
            method,
            arguments,
            target_class,
            chain: chain.into(),
            index: 0,
            started_at: Instant::now(),
            attributes: HashMap::new(),
        }
    }

    pub(crate) fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// 执行链上的下一个元素
    ///
    /// 条件元素的匹配器拒绝当前参数时跳过该元素，继续向后查找；链走完后调用目标方法。
    /// 返回后游标恢复到调用前的位置，环绕通知可以再次调用 `proceed` 重新执行下游链。
    pub async fn proceed(&mut self) -> Result<ReturnValue> {
        let cursor = self.index;
        let result = self.proceed_from(cursor).await;
        self.index = cursor;
        result
    }

    async fn proceed_from(&mut self, mut position: usize) -> Result<ReturnValue> {
        let chain = Arc::clone(&self.chain);
        while let Some(entry) = chain.get(position) {
            position += 1;
            if !entry.applies_to(&self.method, &self.target_class, &self.arguments) {
                tracing::trace!(
                    "Skipping interceptor '{}' for {}: runtime matcher rejected arguments",
                    entry.interceptor().name(),
                    self.method
                );
                continue;
            }
            self.index = position;
            return entry.interceptor().invoke(self).await;
        }

        self.index = chain.len();
        self.invoke_target().await
    }

    async fn invoke_target(&self) -> Result<ReturnValue> {
        match &self.target {
            Some(target) => target.invoke(&self.method, &self.arguments).await,
            None => Err(AopError::NoTarget(self.method.signature()).into()),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// 可变参数，环绕通知可以在 `proceed` 之前替换参数
    pub fn arguments_mut(&mut self) -> &mut Arguments {
        &mut self.arguments
    }

    /// 目标对象
    pub fn this(&self) -> Option<&Arc<dyn Target>> {
        self.target.as_ref()
    }

    pub fn target_class(&self) -> &ClassInfo {
        &self.target_class
    }

    /// 发起调用的代理（直接执行拦截链时为空）
    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn join_point(&self) -> JoinPoint<'_> {
        JoinPoint::new(
            &self.method,
            &self.arguments,
            &self.target_class,
            self.started_at,
        )
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// 链长度（包含条件元素）
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// 设置用户属性，在同一次调用的拦截器之间传递数据
    pub fn set_attribute<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.attributes.insert(key.into(), Arc::new(value));
    }

    pub fn attribute<T: Any>(&self, key: &str) -> Option<&T> {
        self.attributes.get(key)?.downcast_ref::<T>()
    }

    pub fn remove_attribute(&mut self, key: &str) -> bool {
        self.attributes.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::MethodInterceptor;
    use crate::pointcut::{MethodMatcher, RuntimeMethodMatcher, TrueMethodMatcher};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: ClassInfo = ClassInfo::new("Counter");
    const INCREMENT: Method = Method::new("Counter", "increment");

    struct Counter {
        calls: AtomicUsize,
        fail_until: usize,
    }

    #[async_trait]
    impl Target for Counter {
        fn target_class(&self) -> ClassInfo {
            COUNTER
        }

        async fn invoke(&self, _method: &Method, args: &Arguments) -> Result<ReturnValue> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_until {
                anyhow::bail!("transient failure #{}", call);
            }
            let step = args.get::<u32>(0).copied().unwrap_or(1);
            Ok(ReturnValue::new(step * 10))
        }
    }

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl MethodInterceptor for Recorder {
        async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
            self.log.lock().push(self.label);
            invocation.proceed().await
        }
    }

    struct Retry {
        attempts: usize,
    }

    #[async_trait]
    impl MethodInterceptor for Retry {
        async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
            let mut last = None;
            for _ in 0..self.attempts {
                match invocation.proceed().await {
                    Ok(value) => return Ok(value),
                    Err(err) => last = Some(err),
                }
            }
            Err(last.unwrap_or_else(|| anyhow::anyhow!("no attempts")))
        }
    }

    struct Doubler;

    #[async_trait]
    impl MethodInterceptor for Doubler {
        async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
            let step = invocation.arguments().get::<u32>(0).copied().unwrap_or(1);
            invocation.arguments_mut().set(0, step * 2)?;
            invocation.set_attribute("doubled", true);
            invocation.proceed().await
        }
    }

    fn counter(fail_until: usize) -> Arc<Counter> {
        Arc::new(Counter {
            calls: AtomicUsize::new(0),
            fail_until,
        })
    }

    #[tokio::test]
    async fn test_empty_chain_invokes_target() {
        let target = counter(0);
        let mut invocation = MethodInvocation::new(
            INCREMENT,
            Arguments::new().with(3u32),
            Some(target.clone() as Arc<dyn Target>),
            COUNTER,
            Vec::new(),
        );
        let value = invocation.proceed().await.unwrap();
        assert_eq!(value.downcast::<u32>().unwrap(), 30);
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conditional_entry_skipped_without_aborting() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let matcher: Arc<dyn MethodMatcher> = Arc::new(RuntimeMethodMatcher::new(
            Arc::new(TrueMethodMatcher),
            |_, _, args| args.get::<u32>(0).is_some_and(|step| *step > 5),
        ));
        let chain = vec![
            InterceptorChainEntry::Conditional {
                interceptor: Arc::new(Recorder {
                    label: "large",
                    log: log.clone(),
                }),
                matcher,
            },
            InterceptorChainEntry::Unconditional(Arc::new(Recorder {
                label: "always",
                log: log.clone(),
            })),
        ];

        let mut invocation = MethodInvocation::new(
            INCREMENT,
            Arguments::new().with(1u32),
            Some(counter(0) as Arc<dyn Target>),
            COUNTER,
            chain,
        );
        let value = invocation.proceed().await.unwrap();
        assert_eq!(value.downcast::<u32>().unwrap(), 10);
        assert_eq!(*log.lock(), vec!["always"]);
    }

    #[tokio::test]
    async fn test_retry_reruns_downstream_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let target = counter(2);
        let chain = vec![
            InterceptorChainEntry::Unconditional(Arc::new(Retry { attempts: 3 })),
            InterceptorChainEntry::Unconditional(Arc::new(Recorder {
                label: "inner",
                log: log.clone(),
            })),
        ];

        let mut invocation = MethodInvocation::new(
            INCREMENT,
            Arguments::new(),
            Some(target.clone() as Arc<dyn Target>),
            COUNTER,
            chain,
        );
        let value = invocation.proceed().await.unwrap();
        assert_eq!(value.downcast::<u32>().unwrap(), 10);
        assert_eq!(target.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*log.lock(), vec!["inner", "inner", "inner"]);
    }

    #[tokio::test]
    async fn test_arguments_replaced_before_proceed() {
        let chain = vec![InterceptorChainEntry::Unconditional(
            Arc::new(Doubler) as Arc<dyn MethodInterceptor>
        )];
        let mut invocation = MethodInvocation::new(
            INCREMENT,
            Arguments::new().with(4u32),
            Some(counter(0) as Arc<dyn Target>),
            COUNTER,
            chain,
        );
        let value = invocation.proceed().await.unwrap();
        assert_eq!(value.downcast::<u32>().unwrap(), 80);
        assert_eq!(invocation.attribute::<bool>("doubled"), Some(&true));
    }

    #[tokio::test]
    async fn test_missing_target_is_reported() {
        let mut invocation =
            MethodInvocation::new(INCREMENT, Arguments::new(), None, COUNTER, Vec::new());
        let err = invocation.proceed().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AopError>(),
            Some(AopError::NoTarget(_))
        ));
    }
}
