//! 拦截链解析
//!
//! 根据顾问配置、被调用的方法和目标类型，计算出本次调用需要执行的有序拦截器列表。
//! 解析结果严格保持顾问的配置顺序，不按优先级或具体程度重新排序。

use crate::adapter::AdvisorAdapterRegistry;
use crate::advice::MethodInterceptor;
use crate::advisor::Advisor;
use crate::error::AopResult;
use crate::factory::AdvisedSupport;
use crate::joinpoint::{Arguments, ClassInfo, Method};
use crate::pointcut::MethodMatcher;
use std::fmt;
use std::sync::Arc;

/// 拦截链元素
#[derive(Clone)]
pub enum InterceptorChainEntry {
    /// 对该方法总是执行
    Unconditional(Arc<dyn MethodInterceptor>),
    /// 每次调用时以实际参数重新判断，不匹配时只跳过这一个元素
    Conditional {
        interceptor: Arc<dyn MethodInterceptor>,
        matcher: Arc<dyn MethodMatcher>,
    },
}

impl InterceptorChainEntry {
    pub fn interceptor(&self) -> &Arc<dyn MethodInterceptor> {
        match self {
            InterceptorChainEntry::Unconditional(interceptor) => interceptor,
            InterceptorChainEntry::Conditional { interceptor, .. } => interceptor,
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self, InterceptorChainEntry::Conditional { .. })
    }

    /// 本次调用是否应当执行该元素
    pub fn applies_to(&self, method: &Method, target_class: &ClassInfo, args: &Arguments) -> bool {
        match self {
            InterceptorChainEntry::Unconditional(_) => true,
            InterceptorChainEntry::Conditional { matcher, .. } => {
                matcher.matches_args(method, target_class, args)
            }
        }
    }
}

impl fmt::Debug for InterceptorChainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptorChainEntry::Unconditional(interceptor) => {
                write!(f, "Unconditional({})", interceptor.name())
            }
            InterceptorChainEntry::Conditional { interceptor, .. } => {
                write!(f, "Conditional({})", interceptor.name())
            }
        }
    }
}

/// 拦截链工厂
pub trait AdvisorChainFactory: Send + Sync {
    /// 计算 `method` 在 `target_class` 实例上被调用时的拦截链
    ///
    /// `target_class` 为空时使用方法的声明类型。
    fn get_interceptors_and_dynamic_advice(
        &self,
        config: &AdvisedSupport,
        registry: &AdvisorAdapterRegistry,
        method: &Method,
        target_class: Option<&ClassInfo>,
    ) -> AopResult<Vec<InterceptorChainEntry>>;
}

/// 默认拦截链工厂
///
/// 每次都重新计算，不做缓存；结果只取决于输入。
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAdvisorChainFactory;

impl AdvisorChainFactory for DefaultAdvisorChainFactory {
    fn get_interceptors_and_dynamic_advice(
        &self,
        config: &AdvisedSupport,
        registry: &AdvisorAdapterRegistry,
        method: &Method,
        target_class: Option<&ClassInfo>,
    ) -> AopResult<Vec<InterceptorChainEntry>> {
        let actual_class = target_class
            .copied()
            .unwrap_or_else(|| method.declaring_class());
        let advisors = config.advisors();
        let pre_filtered = config.is_pre_filtered();
        let has_introductions = has_matching_introductions(&advisors, &actual_class);

        let mut chain = Vec::with_capacity(advisors.len());
        for advisor in &advisors {
            match advisor {
                Advisor::Pointcut(pointcut_advisor) => {
                    let pointcut = pointcut_advisor.pointcut();
                    if !pre_filtered && !pointcut.class_filter().matches(&actual_class) {
                        tracing::trace!(
                            "Advisor '{}' rejected by class filter for {}",
                            advisor.name(),
                            actual_class
                        );
                        continue;
                    }
                    let interceptors = registry.get_interceptors(advisor)?;
                    let matcher = pointcut.method_matcher();
                    if !matcher.matches_with_introductions(method, &actual_class, has_introductions)
                    {
                        tracing::trace!(
                            "Advisor '{}' rejected by method matcher for {}",
                            advisor.name(),
                            method
                        );
                        continue;
                    }
                    if matcher.is_runtime() {
                        chain.extend(interceptors.into_iter().map(|interceptor| {
                            InterceptorChainEntry::Conditional {
                                interceptor,
                                matcher: Arc::clone(matcher),
                            }
                        }));
                    } else {
                        chain.extend(
                            interceptors
                                .into_iter()
                                .map(InterceptorChainEntry::Unconditional),
                        );
                    }
                }
                Advisor::Introduction(introduction) => {
                    if pre_filtered || introduction.class_filter().matches(&actual_class) {
                        chain.extend(
                            registry
                                .get_interceptors(advisor)?
                                .into_iter()
                                .map(InterceptorChainEntry::Unconditional),
                        );
                    }
                }
                Advisor::Plain(_) => {
                    chain.extend(
                        registry
                            .get_interceptors(advisor)?
                            .into_iter()
                            .map(InterceptorChainEntry::Unconditional),
                    );
                }
            }
        }

        if config.is_trace_resolution() {
            tracing::debug!(
                "Resolved chain for {} on {} (introductions: {}): {:?}",
                method,
                actual_class,
                has_introductions,
                chain
            );
        }
        Ok(chain)
    }
}

/// 是否有引入顾问适用于该类型
fn has_matching_introductions(advisors: &[Advisor], actual_class: &ClassInfo) -> bool {
    advisors.iter().any(|advisor| match advisor {
        Advisor::Introduction(introduction) => introduction.class_filter().matches(actual_class),
        _ => false,
    })
}
