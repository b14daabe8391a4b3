//! 目标对象与目标源
//!
//! [`Target`] 是被代理对象的动态分发契约，可以手写实现，也可以由 `#[proxied]` 宏生成。
//! [`TargetSource`] 负责在每次调用时提供目标对象。

use crate::error::Result;
use crate::joinpoint::{Arguments, ClassInfo, Method, ReturnValue};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 被代理的目标对象
#[async_trait]
pub trait Target: Send + Sync {
    /// 目标对象的运行时类型
    fn target_class(&self) -> ClassInfo;

    /// 按方法描述分发调用
    async fn invoke(&self, method: &Method, args: &Arguments) -> Result<ReturnValue>;
}

/// 目标源
pub trait TargetSource: Send + Sync {
    /// 目标类型；在拿到目标对象之前就需要确定类型时使用
    fn target_class(&self) -> Option<ClassInfo>;

    /// 每次调用是否都返回同一个目标
    fn is_static(&self) -> bool;

    /// 获取本次调用的目标，没有目标时返回 `None`
    fn get_target(&self) -> Result<Option<Arc<dyn Target>>>;

    /// 调用结束后释放目标
    fn release_target(&self, _target: &Arc<dyn Target>) {}
}

/// 固定目标
pub struct SingletonTargetSource {
    target: Arc<dyn Target>,
    class: ClassInfo,
}

impl SingletonTargetSource {
    pub fn new(target: Arc<dyn Target>) -> Self {
        let class = target.target_class();
        Self { target, class }
    }

    pub fn of(target: impl Target + 'static) -> Self {
        Self::new(Arc::new(target))
    }

    pub fn target(&self) -> &Arc<dyn Target> {
        &self.target
    }
}

impl TargetSource for SingletonTargetSource {
    fn target_class(&self) -> Option<ClassInfo> {
        Some(self.class)
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> Result<Option<Arc<dyn Target>>> {
        Ok(Some(Arc::clone(&self.target)))
    }
}

/// 没有目标的目标源
///
/// 适用于完全由拦截器（例如引入）实现的代理；走到链尾的调用会失败。
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyTargetSource {
    class: Option<ClassInfo>,
}

impl EmptyTargetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_class(class: ClassInfo) -> Self {
        Self { class: Some(class) }
    }
}

impl TargetSource for EmptyTargetSource {
    fn target_class(&self) -> Option<ClassInfo> {
        self.class
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> Result<Option<Arc<dyn Target>>> {
        Ok(None)
    }
}

type TargetFactory = Box<dyn Fn() -> Result<Arc<dyn Target>> + Send + Sync>;

/// 原型目标源，每次调用创建新的目标
pub struct PrototypeTargetSource {
    class: ClassInfo,
    factory: TargetFactory,
    created: AtomicUsize,
    released: AtomicUsize,
}

impl PrototypeTargetSource {
    pub fn new<F>(class: ClassInfo, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Target>> + Send + Sync + 'static,
    {
        Self {
            class,
            factory: Box::new(factory),
            created: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// 已创建的目标数量
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }
}

impl TargetSource for PrototypeTargetSource {
    fn target_class(&self) -> Option<ClassInfo> {
        Some(self.class)
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> Result<Option<Arc<dyn Target>>> {
        let target = (self.factory)()?;
        self.created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Created prototype target of {}", self.class);
        Ok(Some(target))
    }

    fn release_target(&self, _target: &Arc<dyn Target>) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}
