//! 顾问（Advisor）
//!
//! 顾问把通知与“在哪里应用”绑定在一起，并携带排序信息：
//! - [`PointcutAdvisor`]：由切点决定是否应用
//! - [`IntroductionAdvisor`]：只由类型过滤器决定，为目标引入新接口
//! - [`PlainAdvisor`]：无条件应用于所有类型的所有方法

use crate::advice::{Advice, IntroductionInterceptor};
use crate::error::{AopError, AopResult};
use crate::joinpoint::ClassInfo;
use crate::pointcut::{ClassFilter, Pointcut, TrueClassFilter};
use std::fmt;
use std::sync::Arc;

/// 最高优先级（最先执行）
pub const HIGHEST_PRECEDENCE: i32 = i32::MIN;

/// 最低优先级，未显式指定顺序的顾问使用此值
pub const LOWEST_PRECEDENCE: i32 = i32::MAX;

/// 由切点控制的顾问
#[derive(Clone)]
pub struct PointcutAdvisor {
    name: String,
    pointcut: Pointcut,
    advice: Advice,
    order: i32,
}

impl PointcutAdvisor {
    pub fn new(name: impl Into<String>, pointcut: Pointcut, advice: Advice) -> Self {
        Self {
            name: name.into(),
            pointcut,
            advice,
            order: LOWEST_PRECEDENCE,
        }
    }

    pub fn pointcut(&self) -> &Pointcut {
        &self.pointcut
    }
}

/// 引入顾问
#[derive(Clone)]
pub struct IntroductionAdvisor {
    name: String,
    class_filter: Arc<dyn ClassFilter>,
    interceptor: Arc<dyn IntroductionInterceptor>,
    advice: Advice,
    order: i32,
}

impl IntroductionAdvisor {
    pub fn new(name: impl Into<String>, interceptor: Arc<dyn IntroductionInterceptor>) -> Self {
        Self {
            name: name.into(),
            class_filter: Arc::new(TrueClassFilter),
            advice: Advice::Introduction(Arc::clone(&interceptor)),
            interceptor,
            order: LOWEST_PRECEDENCE,
        }
    }

    pub fn with_class_filter(mut self, class_filter: Arc<dyn ClassFilter>) -> Self {
        self.class_filter = class_filter;
        self
    }

    pub fn class_filter(&self) -> &Arc<dyn ClassFilter> {
        &self.class_filter
    }

    /// 被引入的接口
    pub fn interfaces(&self) -> &[&'static str] {
        self.interceptor.interfaces()
    }

    /// 引入顾问必须至少引入一个接口
    pub fn validate_interfaces(&self) -> AopResult<()> {
        if self.interfaces().is_empty() {
            return Err(AopError::InvalidIntroduction {
                advisor: self.name.clone(),
                reason: "no interfaces introduced".to_string(),
            });
        }
        Ok(())
    }
}

/// 无条件顾问
#[derive(Clone)]
pub struct PlainAdvisor {
    name: String,
    advice: Advice,
    order: i32,
}

impl PlainAdvisor {
    pub fn new(name: impl Into<String>, advice: Advice) -> Self {
        Self {
            name: name.into(),
            advice,
            order: LOWEST_PRECEDENCE,
        }
    }
}

/// 顾问
#[derive(Clone)]
pub enum Advisor {
    Pointcut(PointcutAdvisor),
    Introduction(IntroductionAdvisor),
    Plain(PlainAdvisor),
}

impl Advisor {
    pub fn pointcut(name: impl Into<String>, pointcut: Pointcut, advice: Advice) -> Self {
        Advisor::Pointcut(PointcutAdvisor::new(name, pointcut, advice))
    }

    pub fn introduction(
        name: impl Into<String>,
        interceptor: Arc<dyn IntroductionInterceptor>,
    ) -> Self {
        Advisor::Introduction(IntroductionAdvisor::new(name, interceptor))
    }

    pub fn plain(name: impl Into<String>, advice: Advice) -> Self {
        Advisor::Plain(PlainAdvisor::new(name, advice))
    }

    pub fn name(&self) -> &str {
        match self {
            Advisor::Pointcut(a) => &a.name,
            Advisor::Introduction(a) => &a.name,
            Advisor::Plain(a) => &a.name,
        }
    }

    pub fn advice(&self) -> &Advice {
        match self {
            Advisor::Pointcut(a) => &a.advice,
            Advisor::Introduction(a) => &a.advice,
            Advisor::Plain(a) => &a.advice,
        }
    }

    /// 排序值（越小越先执行）
    pub fn order(&self) -> i32 {
        match self {
            Advisor::Pointcut(a) => a.order,
            Advisor::Introduction(a) => a.order,
            Advisor::Plain(a) => a.order,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        match &mut self {
            Advisor::Pointcut(a) => a.order = order,
            Advisor::Introduction(a) => a.order = order,
            Advisor::Plain(a) => a.order = order,
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Advisor::Pointcut(_) => "pointcut",
            Advisor::Introduction(_) => "introduction",
            Advisor::Plain(_) => "plain",
        }
    }

    /// 该顾问是否可能应用于指定类型的某个方法
    ///
    /// 类型未声明方法列表时，只按类型过滤器判断。
    pub fn can_apply(&self, class: &ClassInfo, has_introductions: bool) -> bool {
        match self {
            Advisor::Introduction(a) => a.class_filter.matches(class),
            Advisor::Pointcut(a) => {
                if !a.pointcut.class_filter().matches(class) {
                    return false;
                }
                let methods = class.all_methods();
                methods.is_empty()
                    || methods.iter().any(|method| {
                        a.pointcut
                            .method_matcher()
                            .matches_with_introductions(method, class, has_introductions)
                    })
            }
            Advisor::Plain(_) => true,
        }
    }
}

impl From<PointcutAdvisor> for Advisor {
    fn from(advisor: PointcutAdvisor) -> Self {
        Advisor::Pointcut(advisor)
    }
}

impl From<IntroductionAdvisor> for Advisor {
    fn from(advisor: IntroductionAdvisor) -> Self {
        Advisor::Introduction(advisor)
    }
}

impl From<PlainAdvisor> for Advisor {
    fn from(advisor: PlainAdvisor) -> Self {
        Advisor::Plain(advisor)
    }
}

impl fmt::Debug for Advisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advisor")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("advice", self.advice())
            .field("order", &self.order())
            .finish()
    }
}

/// 按排序值做稳定排序，顺序相同的顾问保持原有的相对顺序
pub fn sort_advisors(advisors: &mut [Advisor]) {
    advisors.sort_by_key(Advisor::order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::MethodInterceptor;
    use crate::invocation::MethodInvocation;
    use crate::joinpoint::{Method, ReturnValue};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl MethodInterceptor for Noop {
        async fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<ReturnValue> {
            invocation.proceed().await
        }
    }

    struct NoInterfaces;

    #[async_trait]
    impl MethodInterceptor for NoInterfaces {
        async fn invoke(&self, invocation: &mut MethodInvocation) -> anyhow::Result<ReturnValue> {
            invocation.proceed().await
        }
    }

    impl IntroductionInterceptor for NoInterfaces {
        fn interfaces(&self) -> &[&'static str] {
            &[]
        }
    }

    static REPO: ClassInfo = ClassInfo::new("JdbcRepo").declaring(&[
        Method::new("JdbcRepo", "save"),
        Method::new("JdbcRepo", "find"),
    ]);
    static OPAQUE: ClassInfo = ClassInfo::new("OpaqueRepo");

    #[test]
    fn test_sort_is_stable() {
        let mut advisors = vec![
            Advisor::plain("a", Advice::around(Noop)).with_order(5),
            Advisor::plain("b", Advice::around(Noop)),
            Advisor::plain("c", Advice::around(Noop)).with_order(1),
            Advisor::plain("d", Advice::around(Noop)).with_order(5),
        ];
        sort_advisors(&mut advisors);
        let names: Vec<_> = advisors.iter().map(Advisor::name).collect();
        assert_eq!(names, ["c", "a", "d", "b"]);
    }

    #[test]
    fn test_can_apply_checks_declared_methods() {
        let deletes = Advisor::pointcut(
            "deletes",
            Pointcut::method_names(["delete*"]).unwrap(),
            Advice::around(Noop),
        );
        assert!(!deletes.can_apply(&REPO, false));
        // 未声明方法的类型只按类型过滤器判断
        assert!(deletes.can_apply(&OPAQUE, false));

        let saves = Advisor::pointcut(
            "saves",
            Pointcut::method_names(["save"]).unwrap(),
            Advice::around(Noop),
        );
        assert!(saves.can_apply(&REPO, false));
    }

    #[test]
    fn test_introduction_without_interfaces_is_invalid() {
        let advisor = IntroductionAdvisor::new("empty", Arc::new(NoInterfaces));
        assert!(matches!(
            advisor.validate_interfaces(),
            Err(AopError::InvalidIntroduction { .. })
        ));
    }
}
