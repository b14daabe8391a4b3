//! 代理配置与代理工厂
//!
//! [`AdvisedSupport`] 持有顾问列表、代理接口、目标源及各项开关；
//! [`ProxyFactory`] 在其上提供构建代理的两个入口。

use crate::adapter::{wrap_advice, AdvisorAdapterRegistry};
use crate::advice::Advice;
use crate::advisor::Advisor;
use crate::cache::{ChainCache, MethodCacheKey};
use crate::chain::{AdvisorChainFactory, DefaultAdvisorChainFactory, InterceptorChainEntry};
use crate::config::ProxyConfig;
use crate::error::{AopError, AopResult};
use crate::joinpoint::{type_names_match, ClassInfo, Method};
use crate::proxy::{Proxy, ProxyContext};
use crate::target::{EmptyTargetSource, SingletonTargetSource, Target, TargetSource};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// 代理配置
///
/// 顾问的插入顺序有意义，解析时不会重新排序。所有顾问变更都会使配置代数加一
/// 并清空已缓存的拦截链；冻结后顾问与接口不可再修改。
pub struct AdvisedSupport {
    advisors: RwLock<Vec<Advisor>>,
    generation: AtomicU64,
    interfaces: RwLock<Vec<&'static str>>,
    target_source: RwLock<Arc<dyn TargetSource>>,
    pre_filtered: AtomicBool,
    expose_proxy: AtomicBool,
    frozen: AtomicBool,
    cache_chains: AtomicBool,
    trace_resolution: AtomicBool,
    chain_factory: Arc<dyn AdvisorChainFactory>,
    cache: ChainCache,
}

impl AdvisedSupport {
    pub fn new(target_source: Arc<dyn TargetSource>) -> Self {
        let defaults = ProxyConfig::default();
        Self {
            advisors: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
            interfaces: RwLock::new(Vec::new()),
            target_source: RwLock::new(target_source),
            pre_filtered: AtomicBool::new(defaults.pre_filtered),
            expose_proxy: AtomicBool::new(defaults.expose_proxy),
            frozen: AtomicBool::new(defaults.frozen),
            cache_chains: AtomicBool::new(defaults.cache_chains),
            trace_resolution: AtomicBool::new(defaults.trace_resolution),
            chain_factory: Arc::new(DefaultAdvisorChainFactory),
            cache: ChainCache::new(),
        }
    }

    pub fn with_chain_factory(mut self, chain_factory: Arc<dyn AdvisorChainFactory>) -> Self {
        self.chain_factory = chain_factory;
        self
    }

    /// 应用配置中的开关
    pub fn apply_config(&self, config: &ProxyConfig) {
        self.set_pre_filtered(config.pre_filtered);
        self.set_expose_proxy(config.expose_proxy);
        self.set_cache_chains(config.cache_chains);
        self.set_trace_resolution(config.trace_resolution);
        if config.frozen {
            self.freeze();
        }
    }

    // ------------------------------------------------------------------
    // 目标
    // ------------------------------------------------------------------

    pub fn target_source(&self) -> Arc<dyn TargetSource> {
        Arc::clone(&self.target_source.read())
    }

    pub fn set_target_source(&self, target_source: Arc<dyn TargetSource>) {
        *self.target_source.write() = target_source;
        self.cache.clear();
    }

    pub fn target_class(&self) -> Option<ClassInfo> {
        self.target_source.read().target_class()
    }

    // ------------------------------------------------------------------
    // 顾问
    // ------------------------------------------------------------------

    /// 顾问列表快照
    pub fn advisors(&self) -> Vec<Advisor> {
        self.advisors.read().clone()
    }

    pub fn advisor_count(&self) -> usize {
        self.advisors.read().len()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.advisors
            .read()
            .iter()
            .position(|advisor| advisor.name() == name)
    }

    pub fn add_advisor(&self, advisor: Advisor) -> AopResult<()> {
        let position = self.advisor_count();
        self.add_advisor_at(position, advisor)
    }

    pub fn add_advisor_at(&self, position: usize, advisor: Advisor) -> AopResult<()> {
        self.validate_introduction(&advisor)?;
        let introduced = self.mutate(|advisors| {
            if position > advisors.len() {
                return Err(AopError::AdvisorIndexOutOfBounds {
                    index: position,
                    count: advisors.len(),
                });
            }
            tracing::debug!(
                "Adding {} advisor '{}' at position {}",
                advisor.kind(),
                advisor.name(),
                position
            );
            let introduced = introduced_interfaces(&advisor);
            advisors.insert(position, advisor);
            Ok(introduced)
        })?;
        for interface in introduced {
            self.push_interface(interface);
        }
        Ok(())
    }

    /// 把通知包装为顾问后追加
    pub fn add_advice(&self, advice: Advice) -> AopResult<()> {
        let name = format!("advice#{}", self.advisor_count());
        self.add_advisor(wrap_advice(name, advice)?)
    }

    pub fn remove_advisor(&self, index: usize) -> AopResult<Advisor> {
        self.mutate(|advisors| {
            if index >= advisors.len() {
                return Err(AopError::AdvisorIndexOutOfBounds {
                    index,
                    count: advisors.len(),
                });
            }
            let removed = advisors.remove(index);
            tracing::debug!("Removed advisor '{}'", removed.name());
            Ok(removed)
        })
    }

    pub fn remove_advisor_named(&self, name: &str) -> AopResult<Advisor> {
        let index = self
            .index_of(name)
            .ok_or_else(|| AopError::AdvisorNotFound(name.to_string()))?;
        self.remove_advisor(index)
    }

    /// 按名称替换顾问，保持其位置
    pub fn replace_advisor(&self, name: &str, advisor: Advisor) -> AopResult<Advisor> {
        self.validate_introduction(&advisor)?;
        let (replaced, introduced) = self.mutate(|advisors| {
            let slot = advisors
                .iter_mut()
                .find(|existing| existing.name() == name)
                .ok_or_else(|| AopError::AdvisorNotFound(name.to_string()))?;
            let introduced = introduced_interfaces(&advisor);
            Ok((std::mem::replace(slot, advisor), introduced))
        })?;
        for interface in introduced {
            self.push_interface(interface);
        }
        Ok(replaced)
    }

    fn validate_introduction(&self, advisor: &Advisor) -> AopResult<()> {
        match advisor {
            Advisor::Introduction(introduction) => introduction.validate_interfaces(),
            _ => Ok(()),
        }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Advisor>) -> AopResult<R>) -> AopResult<R> {
        self.check_not_frozen()?;
        let mut advisors = self.advisors.write();
        let result = f(&mut advisors)?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.clear();
        Ok(result)
    }

    fn check_not_frozen(&self) -> AopResult<()> {
        if self.is_frozen() {
            return Err(AopError::ConfigFrozen);
        }
        Ok(())
    }

    /// 配置代数，每次顾问变更加一
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // 接口
    // ------------------------------------------------------------------

    pub fn add_interface(&self, interface: &'static str) -> AopResult<()> {
        self.check_not_frozen()?;
        self.push_interface(interface);
        Ok(())
    }

    fn push_interface(&self, interface: &'static str) {
        let mut interfaces = self.interfaces.write();
        if !interfaces.contains(&interface) {
            interfaces.push(interface);
        }
    }

    pub fn remove_interface(&self, interface: &str) -> AopResult<bool> {
        self.check_not_frozen()?;
        let mut interfaces = self.interfaces.write();
        let before = interfaces.len();
        interfaces.retain(|candidate| *candidate != interface);
        Ok(interfaces.len() != before)
    }

    pub fn interfaces(&self) -> Vec<&'static str> {
        self.interfaces.read().clone()
    }

    pub fn is_interface_proxied(&self, interface: &str) -> bool {
        self.interfaces
            .read()
            .iter()
            .any(|candidate| type_names_match(candidate, interface))
    }

    // ------------------------------------------------------------------
    // 开关
    // ------------------------------------------------------------------

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn set_pre_filtered(&self, pre_filtered: bool) {
        if self.pre_filtered.swap(pre_filtered, Ordering::AcqRel) != pre_filtered {
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.cache.clear();
        }
    }

    pub fn is_pre_filtered(&self) -> bool {
        self.pre_filtered.load(Ordering::Acquire)
    }

    pub fn set_expose_proxy(&self, expose_proxy: bool) {
        self.expose_proxy.store(expose_proxy, Ordering::Release);
    }

    pub fn is_expose_proxy(&self) -> bool {
        self.expose_proxy.load(Ordering::Acquire)
    }

    pub fn set_cache_chains(&self, cache_chains: bool) {
        self.cache_chains.store(cache_chains, Ordering::Release);
        if !cache_chains {
            self.cache.clear();
        }
    }

    pub fn is_cache_chains(&self) -> bool {
        self.cache_chains.load(Ordering::Acquire)
    }

    pub fn set_trace_resolution(&self, trace_resolution: bool) {
        self.trace_resolution.store(trace_resolution, Ordering::Release);
    }

    pub fn is_trace_resolution(&self) -> bool {
        self.trace_resolution.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // 拦截链
    // ------------------------------------------------------------------

    /// 获取方法的拦截链，启用缓存时按（方法，目标类型，注册表）缓存
    pub fn interceptor_chain(
        &self,
        method: &Method,
        target_class: Option<&ClassInfo>,
        registry: &AdvisorAdapterRegistry,
    ) -> AopResult<Arc<[InterceptorChainEntry]>> {
        let resolve = || {
            self.chain_factory
                .get_interceptors_and_dynamic_advice(self, registry, method, target_class)
        };
        if !self.is_cache_chains() {
            return Ok(resolve()?.into());
        }

        // 先读代数再解析：解析期间发生的变更只会让条目提前失效
        let generation = self.generation();
        let class = target_class
            .copied()
            .unwrap_or_else(|| method.declaring_class());
        let key = MethodCacheKey::new(method, &class, registry.id());
        self.cache.get_or_compute(key, generation, resolve)
    }

    /// 已缓存的拦截链数量
    pub fn cached_chain_count(&self) -> usize {
        self.cache.len()
    }
}

impl fmt::Debug for AdvisedSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisedSupport")
            .field("advisors", &*self.advisors.read())
            .field("interfaces", &*self.interfaces.read())
            .field("target_class", &self.target_class())
            .field("pre_filtered", &self.is_pre_filtered())
            .field("expose_proxy", &self.is_expose_proxy())
            .field("frozen", &self.is_frozen())
            .field("generation", &self.generation())
            .finish()
    }
}

fn introduced_interfaces(advisor: &Advisor) -> Vec<&'static str> {
    match advisor {
        Advisor::Introduction(introduction) => introduction.interfaces().to_vec(),
        _ => Vec::new(),
    }
}

/// 代理工厂
///
/// ```ignore
/// let factory = ProxyFactory::new(JdbcRepo::default());
/// factory.add_interface("Repo")?;
/// factory.add_advisor(Advisor::pointcut("tx", Pointcut::method_names(["save*"])?, Advice::around(TxInterceptor)))?;
/// let proxy = factory.get_proxy()?;
/// ```
pub struct ProxyFactory {
    advised: Arc<AdvisedSupport>,
}

impl ProxyFactory {
    pub fn new(target: impl Target + 'static) -> Self {
        Self::for_target(Arc::new(target))
    }

    pub fn for_target(target: Arc<dyn Target>) -> Self {
        Self::with_target_source(Arc::new(SingletonTargetSource::new(target)))
    }

    pub fn with_target_source(target_source: Arc<dyn TargetSource>) -> Self {
        Self::from_advised(AdvisedSupport::new(target_source))
    }

    /// 没有目标的代理，调用完全由拦截器处理
    pub fn without_target(class: ClassInfo) -> Self {
        Self::with_target_source(Arc::new(EmptyTargetSource::for_class(class)))
    }

    pub fn from_advised(advised: AdvisedSupport) -> Self {
        Self {
            advised: Arc::new(advised),
        }
    }

    pub fn with_config(self, config: &ProxyConfig) -> Self {
        self.advised.apply_config(config);
        self
    }

    pub fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.advised
    }

    pub fn add_advisor(&self, advisor: Advisor) -> AopResult<()> {
        self.advised.add_advisor(advisor)
    }

    pub fn add_advice(&self, advice: Advice) -> AopResult<()> {
        self.advised.add_advice(advice)
    }

    pub fn add_interface(&self, interface: &'static str) -> AopResult<()> {
        self.advised.add_interface(interface)
    }

    pub fn set_pre_filtered(&self, pre_filtered: bool) {
        self.advised.set_pre_filtered(pre_filtered);
    }

    pub fn set_expose_proxy(&self, expose_proxy: bool) {
        self.advised.set_expose_proxy(expose_proxy);
    }

    pub fn freeze(&self) {
        self.advised.freeze();
    }

    /// 使用环境上下文构建代理
    ///
    /// 环境上下文是当前线程通过 [`ProxyContext::enter`] 安装的上下文，
    /// 没有时为进程默认上下文。
    pub fn get_proxy(&self) -> AopResult<Proxy> {
        self.create_proxy(ProxyContext::ambient())
    }

    /// 使用显式上下文构建代理
    ///
    /// `None` 表示使用代理机制自身的默认上下文，它可能与环境上下文不同：
    /// 当前线程安装的上下文和进程默认上下文都不会被采用。
    pub fn get_proxy_in(&self, context: Option<&ProxyContext>) -> AopResult<Proxy> {
        let context = context
            .cloned()
            .unwrap_or_else(ProxyContext::mechanism_default);
        self.create_proxy(context)
    }

    fn create_proxy(&self, context: ProxyContext) -> AopResult<Proxy> {
        for advisor in self.advised.advisors() {
            context.registry().validate(&advisor)?;
        }
        tracing::debug!(
            "Creating proxy for {:?} with {} advisor(s) in context '{}'",
            self.advised.target_class().map(|class| class.name()),
            self.advised.advisor_count(),
            context.name()
        );
        Ok(Proxy::new(Arc::clone(&self.advised), context))
    }
}
