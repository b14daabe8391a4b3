//! 顾问适配器注册表
//!
//! 把各种通知类型转换为统一的可执行形式 [`MethodInterceptor`]。
//! 新的通知类型通过注册 [`AdvisorAdapter`] 接入，无需修改拦截链解析逻辑。

use crate::advice::{
    Advice, AfterAdvice, AfterReturningAdvice, IntroductionInterceptor, MethodBeforeAdvice,
    MethodInterceptor, ThrowsAdvice,
};
use crate::advisor::{Advisor, IntroductionAdvisor, PlainAdvisor};
use crate::error::{AopError, AopResult, Result};
use crate::invocation::MethodInvocation;
use crate::joinpoint::ReturnValue;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 顾问适配器
///
/// 每个适配器负责把一种通知类型包装为拦截器
pub trait AdvisorAdapter: Send + Sync {
    /// 适配器名称（用于日志）
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn supports_advice(&self, advice: &Advice) -> bool;

    /// 为顾问的通知创建拦截器，仅在 `supports_advice` 返回 true 时调用
    fn get_interceptor(&self, advisor: &Advisor) -> AopResult<Arc<dyn MethodInterceptor>>;
}

fn unsupported(advisor: &Advisor) -> AopError {
    AopError::UnknownAdviceType {
        advisor: advisor.name().to_string(),
        advice_type: advisor.advice().advice_type().to_string(),
    }
}

// ============================================================================
// 内置适配器
// ============================================================================

/// 前置通知适配器
pub struct BeforeAdviceAdapter;

impl AdvisorAdapter for BeforeAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::Before(_))
    }

    fn get_interceptor(&self, advisor: &Advisor) -> AopResult<Arc<dyn MethodInterceptor>> {
        match advisor.advice() {
            Advice::Before(advice) => Ok(Arc::new(MethodBeforeAdviceInterceptor {
                advice: Arc::clone(advice),
            })),
            _ => Err(unsupported(advisor)),
        }
    }
}

/// 返回后通知适配器
pub struct AfterReturningAdviceAdapter;

impl AdvisorAdapter for AfterReturningAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::AfterReturning(_))
    }

    fn get_interceptor(&self, advisor: &Advisor) -> AopResult<Arc<dyn MethodInterceptor>> {
        match advisor.advice() {
            Advice::AfterReturning(advice) => Ok(Arc::new(AfterReturningAdviceInterceptor {
                advice: Arc::clone(advice),
            })),
            _ => Err(unsupported(advisor)),
        }
    }
}

/// 异常通知适配器
pub struct ThrowsAdviceAdapter;

impl AdvisorAdapter for ThrowsAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::AfterThrowing(_))
    }

    fn get_interceptor(&self, advisor: &Advisor) -> AopResult<Arc<dyn MethodInterceptor>> {
        match advisor.advice() {
            Advice::AfterThrowing(advice) => Ok(Arc::new(ThrowsAdviceInterceptor {
                advice: Arc::clone(advice),
            })),
            _ => Err(unsupported(advisor)),
        }
    }
}

/// 后置通知适配器
pub struct AfterAdviceAdapter;

impl AdvisorAdapter for AfterAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::After(_))
    }

    fn get_interceptor(&self, advisor: &Advisor) -> AopResult<Arc<dyn MethodInterceptor>> {
        match advisor.advice() {
            Advice::After(advice) => Ok(Arc::new(AfterAdviceInterceptor {
                advice: Arc::clone(advice),
            })),
            _ => Err(unsupported(advisor)),
        }
    }
}

// ============================================================================
// 适配器产生的拦截器
// ============================================================================

/// 先执行前置通知，再继续调用链
pub struct MethodBeforeAdviceInterceptor {
    advice: Arc<dyn MethodBeforeAdvice>,
}

#[async_trait]
impl MethodInterceptor for MethodBeforeAdviceInterceptor {
    fn name(&self) -> &str {
        "MethodBeforeAdviceInterceptor"
    }

    async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
        self.advice.before(&invocation.join_point()).await?;
        invocation.proceed().await
    }
}

/// 调用链成功返回后执行返回后通知
pub struct AfterReturningAdviceInterceptor {
    advice: Arc<dyn AfterReturningAdvice>,
}

#[async_trait]
impl MethodInterceptor for AfterReturningAdviceInterceptor {
    fn name(&self) -> &str {
        "AfterReturningAdviceInterceptor"
    }

    async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
        let result = invocation.proceed().await?;
        self.advice
            .after_returning(&invocation.join_point(), &result)
            .await?;
        Ok(result)
    }
}

/// 调用链失败时执行异常通知，错误原样继续传播
pub struct ThrowsAdviceInterceptor {
    advice: Arc<dyn ThrowsAdvice>,
}

#[async_trait]
impl MethodInterceptor for ThrowsAdviceInterceptor {
    fn name(&self) -> &str {
        "ThrowsAdviceInterceptor"
    }

    async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
        match invocation.proceed().await {
            Ok(result) => Ok(result),
            Err(error) => {
                self.advice
                    .after_throwing(&invocation.join_point(), &error)
                    .await;
                Err(error)
            }
        }
    }
}

/// 无论成功失败都执行后置通知
pub struct AfterAdviceInterceptor {
    advice: Arc<dyn AfterAdvice>,
}

#[async_trait]
impl MethodInterceptor for AfterAdviceInterceptor {
    fn name(&self) -> &str {
        "AfterAdviceInterceptor"
    }

    async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
        let result = invocation.proceed().await;
        self.advice.after(&invocation.join_point()).await;
        result
    }
}

/// 以 `MethodInterceptor` 的形式持有引入拦截器
struct IntroductionHandle(Arc<dyn IntroductionInterceptor>);

#[async_trait]
impl MethodInterceptor for IntroductionHandle {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
        self.0.invoke(invocation).await
    }
}

// ============================================================================
// 注册表
// ============================================================================

/// 进程级默认注册表（只含内置适配器，构建后不可变）
static SHARED_DEFAULT: Lazy<Arc<AdvisorAdapterRegistry>> =
    Lazy::new(|| Arc::new(AdvisorAdapterRegistry::new()));

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

fn next_registry_id() -> u64 {
    NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed)
}

/// 顾问适配器注册表
///
/// 注册只能通过 `&mut self` 进行，装配完成后以 `Arc` 只读共享：
///
/// ```ignore
/// let mut registry = AdvisorAdapterRegistry::new();
/// registry.register_adapter(AuditAdviceAdapter);
/// let context = ProxyContext::new("audited", Arc::new(registry));
/// ```
pub struct AdvisorAdapterRegistry {
    id: u64,
    adapters: Vec<Arc<dyn AdvisorAdapter>>,
}

impl AdvisorAdapterRegistry {
    /// 创建注册表并注册内置适配器（前置、返回后、异常、后置）
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_adapter(BeforeAdviceAdapter);
        registry.register_adapter(AfterReturningAdviceAdapter);
        registry.register_adapter(ThrowsAdviceAdapter);
        registry.register_adapter(AfterAdviceAdapter);
        registry
    }

    /// 创建不含任何适配器的注册表
    pub fn empty() -> Self {
        Self {
            id: next_registry_id(),
            adapters: Vec::new(),
        }
    }

    /// 注册表标识，每次注册适配器后都会变化
    ///
    /// 拦截链缓存以它区分不同注册表解析出的链。
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 进程级默认注册表
    pub fn shared_default() -> Arc<AdvisorAdapterRegistry> {
        Arc::clone(&SHARED_DEFAULT)
    }

    /// 注册适配器（只追加，不支持移除）
    pub fn register_adapter(&mut self, adapter: impl AdvisorAdapter + 'static) {
        self.register_shared(Arc::new(adapter));
    }

    pub fn register_shared(&mut self, adapter: Arc<dyn AdvisorAdapter>) {
        tracing::debug!("Registering advisor adapter: {}", adapter.name());
        self.adapters.push(adapter);
        self.id = next_registry_id();
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// 该通知能否被转换为拦截器
    pub fn supports(&self, advice: &Advice) -> bool {
        advice.is_interceptor()
            || self
                .adapters
                .iter()
                .any(|adapter| adapter.supports_advice(advice))
    }

    /// 检查顾问的通知能否被执行
    pub fn validate(&self, advisor: &Advisor) -> AopResult<()> {
        if self.supports(advisor.advice()) {
            Ok(())
        } else {
            Err(unsupported(advisor))
        }
    }

    /// 把通知包装为顾问
    ///
    /// 引入通知包装为匹配所有类型的引入顾问，其它通知包装为无条件顾问。
    pub fn wrap(&self, name: impl Into<String>, advice: Advice) -> AopResult<Advisor> {
        let advisor = wrap_advice(name, advice)?;
        self.validate(&advisor)?;
        Ok(advisor)
    }

    /// 获取顾问对应的拦截器
    ///
    /// 可直接执行的通知本身就是拦截器；其余通知按注册顺序交给支持它的适配器，
    /// 每个支持的适配器贡献一个拦截器。
    pub fn get_interceptors(
        &self,
        advisor: &Advisor,
    ) -> AopResult<Vec<Arc<dyn MethodInterceptor>>> {
        let advice = advisor.advice();
        let mut interceptors: Vec<Arc<dyn MethodInterceptor>> = Vec::with_capacity(1);
        match advice {
            Advice::Around(interceptor) => interceptors.push(Arc::clone(interceptor)),
            Advice::Introduction(interceptor) => {
                interceptors.push(Arc::new(IntroductionHandle(Arc::clone(interceptor))))
            }
            _ => {}
        }

        for adapter in &self.adapters {
            if adapter.supports_advice(advice) {
                interceptors.push(adapter.get_interceptor(advisor)?);
            }
        }

        if interceptors.is_empty() {
            return Err(unsupported(advisor));
        }
        Ok(interceptors)
    }
}

impl Default for AdvisorAdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 不经校验地把通知包装为顾问
pub(crate) fn wrap_advice(name: impl Into<String>, advice: Advice) -> AopResult<Advisor> {
    match advice {
        Advice::Introduction(interceptor) => {
            let advisor = IntroductionAdvisor::new(name, interceptor);
            advisor.validate_interfaces()?;
            Ok(Advisor::Introduction(advisor))
        }
        other => Ok(Advisor::Plain(PlainAdvisor::new(name, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::InterceptorChainEntry;
    use crate::joinpoint::{Arguments, ClassInfo, JoinPoint, Method};
    use crate::target::Target;
    use parking_lot::Mutex;

    static ACCOUNT: ClassInfo = ClassInfo::new("Account");
    const WITHDRAW: Method = Method::new("Account", "withdraw");

    #[derive(Debug, thiserror::Error)]
    #[error("insufficient funds: balance {balance}")]
    struct InsufficientFunds {
        balance: u64,
    }

    struct Account {
        balance: u64,
    }

    #[async_trait]
    impl Target for Account {
        fn target_class(&self) -> ClassInfo {
            ACCOUNT
        }

        async fn invoke(&self, _method: &Method, args: &Arguments) -> Result<ReturnValue> {
            let amount = args.extract::<u64>(&WITHDRAW, 0)?;
            if amount > self.balance {
                return Err(InsufficientFunds {
                    balance: self.balance,
                }
                .into());
            }
            Ok(ReturnValue::new(self.balance - amount))
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;

    struct LogBefore(Log);

    #[async_trait]
    impl MethodBeforeAdvice for LogBefore {
        async fn before(&self, join_point: &JoinPoint<'_>) -> Result<()> {
            self.0.lock().push(format!("before {}", join_point.signature()));
            Ok(())
        }
    }

    struct LogReturning(Log);

    #[async_trait]
    impl AfterReturningAdvice for LogReturning {
        async fn after_returning(
            &self,
            _join_point: &JoinPoint<'_>,
            result: &ReturnValue,
        ) -> Result<()> {
            let balance = result.downcast_ref::<u64>().copied().unwrap_or_default();
            self.0.lock().push(format!("returned {}", balance));
            Ok(())
        }
    }

    struct LogThrows(Log);

    #[async_trait]
    impl ThrowsAdvice for LogThrows {
        async fn after_throwing(&self, _join_point: &JoinPoint<'_>, error: &anyhow::Error) {
            self.0.lock().push(format!("threw {}", error));
        }
    }

    struct LogAfter(Log);

    #[async_trait]
    impl AfterAdvice for LogAfter {
        async fn after(&self, _join_point: &JoinPoint<'_>) {
            self.0.lock().push("after".to_string());
        }
    }

    struct Veto;

    #[async_trait]
    impl MethodBeforeAdvice for Veto {
        async fn before(&self, _join_point: &JoinPoint<'_>) -> Result<()> {
            anyhow::bail!("vetoed")
        }
    }

    fn chain_for(
        registry: &AdvisorAdapterRegistry,
        advice: Vec<Advice>,
    ) -> Vec<InterceptorChainEntry> {
        advice
            .into_iter()
            .enumerate()
            .flat_map(|(i, advice)| {
                let advisor = registry.wrap(format!("advisor-{}", i), advice).unwrap();
                registry.get_interceptors(&advisor).unwrap()
            })
            .map(InterceptorChainEntry::Unconditional)
            .collect()
    }

    async fn withdraw(chain: Vec<InterceptorChainEntry>, amount: u64) -> Result<ReturnValue> {
        let account: Arc<dyn Target> = Arc::new(Account { balance: 100 });
        let mut invocation = MethodInvocation::new(
            WITHDRAW,
            Arguments::new().with(amount),
            Some(account),
            ACCOUNT,
            chain,
        );
        invocation.proceed().await
    }

    fn all_kinds(log: &Log) -> Vec<Advice> {
        vec![
            Advice::before(LogBefore(log.clone())),
            Advice::after_returning(LogReturning(log.clone())),
            Advice::after_throwing(LogThrows(log.clone())),
            Advice::after(LogAfter(log.clone())),
        ]
    }

    #[tokio::test]
    async fn test_builtin_adapters_on_success() {
        let log: Log = Arc::default();
        let registry = AdvisorAdapterRegistry::new();
        let value = withdraw(chain_for(&registry, all_kinds(&log)), 30).await.unwrap();
        assert_eq!(value.downcast::<u64>().unwrap(), 70);
        assert_eq!(
            *log.lock(),
            vec!["before Account::withdraw", "after", "returned 70"]
        );
    }

    #[tokio::test]
    async fn test_builtin_adapters_propagate_error_unchanged() {
        let log: Log = Arc::default();
        let registry = AdvisorAdapterRegistry::new();
        let err = withdraw(chain_for(&registry, all_kinds(&log)), 500)
            .await
            .unwrap_err();

        let original = err.downcast_ref::<InsufficientFunds>().unwrap();
        assert_eq!(original.balance, 100);
        assert_eq!(err.to_string(), "insufficient funds: balance 100");
        assert_eq!(
            *log.lock(),
            vec![
                "before Account::withdraw",
                "after",
                "threw insufficient funds: balance 100"
            ]
        );
    }

    #[tokio::test]
    async fn test_before_advice_error_aborts_call() {
        let log: Log = Arc::default();
        let registry = AdvisorAdapterRegistry::new();
        let mut advice = vec![Advice::before(Veto)];
        advice.extend(all_kinds(&log));
        let err = withdraw(chain_for(&registry, advice), 10).await.unwrap_err();
        assert_eq!(err.to_string(), "vetoed");
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_empty_registry_rejects_non_interceptors() {
        let log: Log = Arc::default();
        let registry = AdvisorAdapterRegistry::empty();
        assert_eq!(registry.adapter_count(), 0);

        let advisor = Advisor::plain("before", Advice::before(LogBefore(log)));
        assert!(matches!(
            registry.get_interceptors(&advisor),
            Err(AopError::UnknownAdviceType { .. })
        ));
        assert!(registry.validate(&advisor).is_err());
    }

    #[test]
    fn test_every_supporting_adapter_contributes() {
        struct ExtraBefore;

        impl AdvisorAdapter for ExtraBefore {
            fn supports_advice(&self, advice: &Advice) -> bool {
                matches!(advice, Advice::Before(_))
            }

            fn get_interceptor(&self, advisor: &Advisor) -> AopResult<Arc<dyn MethodInterceptor>> {
                BeforeAdviceAdapter.get_interceptor(advisor)
            }
        }

        let log: Log = Arc::default();
        let mut registry = AdvisorAdapterRegistry::new();
        registry.register_adapter(ExtraBefore);
        let advisor = Advisor::plain("before", Advice::before(LogBefore(log)));
        assert_eq!(registry.get_interceptors(&advisor).unwrap().len(), 2);
    }

    #[test]
    fn test_shared_default_is_shared() {
        let first = AdvisorAdapterRegistry::shared_default();
        let second = AdvisorAdapterRegistry::shared_default();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.adapter_count(), 4);
    }

    #[test]
    fn test_registry_id_changes_on_registration() {
        let first = AdvisorAdapterRegistry::new();
        let second = AdvisorAdapterRegistry::new();
        assert_ne!(first.id(), second.id());

        let mut extended = AdvisorAdapterRegistry::empty();
        let before = extended.id();
        extended.register_adapter(BeforeAdviceAdapter);
        assert_ne!(extended.id(), before);
    }
}
