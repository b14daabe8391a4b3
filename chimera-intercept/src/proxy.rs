//! 代理
//!
//! [`Proxy`] 是可调用的外观：每次调用时解析（或从缓存获取）拦截链，
//! 按顺序执行后调用目标方法，并把返回值或错误原样交还调用方。
//!
//! 代理的构建依赖 [`ProxyContext`]（其中最重要的是适配器注册表）。构建入口有两个：
//! - 环境上下文：当前线程通过 [`ProxyContext::enter`] 安装的上下文，否则为进程默认上下文
//! - 显式上下文：调用方传入的上下文；传入 `None` 表示使用代理机制自身的默认上下文
//!   （[`ProxyContext::mechanism_default`]），它不受环境上下文影响

use crate::adapter::AdvisorAdapterRegistry;
use crate::error::{AopError, AopResult, Result};
use crate::factory::AdvisedSupport;
use crate::invocation::MethodInvocation;
use crate::joinpoint::{Arguments, ClassInfo, Method, ReturnValue};
use once_cell::sync::{Lazy, OnceCell};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

tokio::task_local! {
    static CURRENT_PROXY: Proxy;
}

/// 访问当前调用所属的代理
///
/// 仅当代理配置了 `expose_proxy` 时可用，例如在目标方法内部通过代理调用自身的其它方法，
/// 使这些调用也经过拦截链。
pub struct AopContext;

impl AopContext {
    pub fn current_proxy() -> Option<Proxy> {
        CURRENT_PROXY.try_with(Proxy::clone).ok()
    }
}

// ============================================================================
// 代理上下文
// ============================================================================

static MECHANISM_DEFAULT: Lazy<ProxyContext> = Lazy::new(|| {
    ProxyContext::new("mechanism-default", AdvisorAdapterRegistry::shared_default())
});

static PROCESS_DEFAULT: OnceCell<ProxyContext> = OnceCell::new();

thread_local! {
    static AMBIENT: RefCell<Vec<ProxyContext>> = const { RefCell::new(Vec::new()) };
}

/// 代理构建上下文
#[derive(Clone)]
pub struct ProxyContext {
    name: Arc<str>,
    registry: Arc<AdvisorAdapterRegistry>,
}

impl ProxyContext {
    pub fn new(name: impl Into<String>, registry: Arc<AdvisorAdapterRegistry>) -> Self {
        let name: String = name.into();
        Self {
            name: name.into(),
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<AdvisorAdapterRegistry> {
        &self.registry
    }

    /// 代理机制自身的默认上下文（只含内置适配器）
    pub fn mechanism_default() -> ProxyContext {
        MECHANISM_DEFAULT.clone()
    }

    /// 安装进程默认上下文，只能在启动阶段调用一次
    pub fn install_default(context: ProxyContext) -> AopResult<()> {
        let name = context.name.clone();
        PROCESS_DEFAULT.set(context).map_err(|_| {
            AopError::Config("process default proxy context is already installed".to_string())
        })?;
        tracing::debug!("Installed default proxy context '{}'", name);
        Ok(())
    }

    /// 当前环境上下文
    ///
    /// 依次查找：当前线程通过 `enter` 安装的上下文、进程默认上下文、代理机制默认上下文。
    pub fn ambient() -> ProxyContext {
        AMBIENT
            .with(|stack| stack.borrow().last().cloned())
            .or_else(|| PROCESS_DEFAULT.get().cloned())
            .unwrap_or_else(Self::mechanism_default)
    }

    /// 在当前线程安装为环境上下文，返回的守卫释放时恢复
    pub fn enter(&self) -> ProxyContextGuard {
        AMBIENT.with(|stack| stack.borrow_mut().push(self.clone()));
        ProxyContextGuard {
            _not_send: PhantomData,
        }
    }
}

impl fmt::Debug for ProxyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyContext")
            .field("name", &self.name)
            .field("adapters", &self.registry.adapter_count())
            .finish()
    }
}

/// 环境上下文守卫
///
/// 与安装它的线程绑定，不能跨线程移动。
pub struct ProxyContextGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for ProxyContextGuard {
    fn drop(&mut self) {
        AMBIENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

// ============================================================================
// 代理
// ============================================================================

struct ProxyInner {
    config: Arc<AdvisedSupport>,
    context: ProxyContext,
}

/// 代理对象
///
/// 克隆开销很小，所有克隆共享同一份配置。
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    pub(crate) fn new(config: Arc<AdvisedSupport>, context: ProxyContext) -> Self {
        Self {
            inner: Arc::new(ProxyInner { config, context }),
        }
    }

    /// 代理所使用的配置
    pub fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.inner.config
    }

    pub fn context(&self) -> &ProxyContext {
        &self.inner.context
    }

    pub fn target_class(&self) -> Option<ClassInfo> {
        self.inner.config.target_class()
    }

    /// 代理的接口（包含引入的接口）
    pub fn proxied_interfaces(&self) -> Vec<&'static str> {
        self.inner.config.interfaces()
    }

    /// 代理是否可以当作指定类型使用
    pub fn is_instance_of(&self, type_name: &str) -> bool {
        self.inner.config.is_interface_proxied(type_name)
            || self
                .target_class()
                .is_some_and(|class| class.is_assignable_to(type_name))
    }

    /// 两个代理是否共享同一个底层对象
    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 调用方法
    ///
    /// 目标方法或拦截器的错误原样返回；拦截链解析失败时返回包装了 [`AopError`] 的错误。
    pub async fn invoke(&self, method: &Method, args: Arguments) -> Result<ReturnValue> {
        let config = &self.inner.config;
        let source = config.target_source();
        let target = source.get_target()?;
        let target_class = target
            .as_ref()
            .map(|target| target.target_class())
            .or_else(|| source.target_class())
            .unwrap_or_else(|| method.declaring_class());

        let registry = self.inner.context.registry();
        let chain = match config.interceptor_chain(method, Some(&target_class), registry) {
            Ok(chain) => chain,
            Err(e) => {
                // 解析失败同样要归还目标
                if let Some(target) = &target {
                    source.release_target(target);
                }
                return Err(e.into());
            }
        };
        tracing::trace!(
            "Invoking {} on {} through {} interceptor(s)",
            method,
            target_class,
            chain.len()
        );

        let mut invocation =
            MethodInvocation::new(*method, args, target.clone(), target_class, chain)
                .with_proxy(self.clone());
        let result = if config.is_expose_proxy() {
            CURRENT_PROXY
                .scope(self.clone(), invocation.proceed())
                .await
        } else {
            invocation.proceed().await
        };

        if let Some(target) = &target {
            source.release_target(target);
        }
        result
    }

    /// 调用方法并把返回值转换为具体类型
    pub async fn call<T: 'static>(&self, method: &Method, args: Arguments) -> Result<T> {
        Ok(self.invoke(method, args).await?.downcast::<T>()?)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("target_class", &self.target_class().map(|class| class.name()))
            .field("interfaces", &self.proxied_interfaces())
            .field("advisors", &self.inner.config.advisor_count())
            .field("context", &self.inner.context.name())
            .finish()
    }
}
