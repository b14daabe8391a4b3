//! 拦截链缓存
//!
//! 按（声明类型，方法名，目标类型，适配器注册表）缓存解析结果。每个条目记录计算时的配置代数，
//! 配置变更后旧条目不再命中。

use crate::chain::InterceptorChainEntry;
use crate::error::AopResult;
use crate::joinpoint::{ClassInfo, Method};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 缓存键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodCacheKey {
    declaring_type: &'static str,
    method: &'static str,
    target_class: &'static str,
    registry: u64,
}

impl MethodCacheKey {
    /// `registry` 为解析所用注册表的 [`id`](crate::AdvisorAdapterRegistry::id)
    pub fn new(method: &Method, target_class: &ClassInfo, registry: u64) -> Self {
        Self {
            declaring_type: method.declaring_type(),
            method: method.name(),
            target_class: target_class.name(),
            registry,
        }
    }
}

struct CachedChain {
    generation: u64,
    chain: Arc<[InterceptorChainEntry]>,
}

/// 拦截链缓存
///
/// 同一个键最多只有一个已发布的链对读者可见：计算在锁外进行，发布时再次检查，
/// 若已有同代条目则丢弃本次结果，返回已发布的链。
#[derive(Default)]
pub struct ChainCache {
    entries: RwLock<HashMap<MethodCacheKey, CachedChain>>,
}

impl ChainCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查找与 `generation` 同代的链
    pub fn get(
        &self,
        key: &MethodCacheKey,
        generation: u64,
    ) -> Option<Arc<[InterceptorChainEntry]>> {
        self.entries
            .read()
            .get(key)
            .filter(|cached| cached.generation == generation)
            .map(|cached| Arc::clone(&cached.chain))
    }

    /// 查找或计算并发布
    pub fn get_or_compute<F>(
        &self,
        key: MethodCacheKey,
        generation: u64,
        compute: F,
    ) -> AopResult<Arc<[InterceptorChainEntry]>>
    where
        F: FnOnce() -> AopResult<Vec<InterceptorChainEntry>>,
    {
        if let Some(chain) = self.get(&key, generation) {
            return Ok(chain);
        }

        let computed: Arc<[InterceptorChainEntry]> = compute()?.into();
        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(existing) if existing.generation == generation => {
                return Ok(Arc::clone(&existing.chain));
            }
            // 配置在计算期间已更新，本次结果只用于当前调用
            Some(existing) if existing.generation > generation => return Ok(computed),
            _ => {}
        }
        tracing::trace!(
            "Caching interceptor chain for {}::{} on {} ({} entries)",
            key.declaring_type,
            key.method,
            key.target_class,
            computed.len()
        );
        entries.insert(
            key,
            CachedChain {
                generation,
                chain: Arc::clone(&computed),
            },
        );
        Ok(computed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
