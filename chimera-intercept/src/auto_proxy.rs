//! 自动代理
//!
//! 从候选顾问中找出适用于目标类型的顾问，按排序值排序后为目标创建代理。
//! 候选顾问可以显式添加，也可以通过 inventory 在编译时注册：
//!
//! ```ignore
//! chimera_intercept::inventory::submit! {
//!     AdvisorRegistration::new("tracing", 100, || {
//!         Ok(Advisor::plain("tracing", Advice::around(TraceInterceptor::new())))
//!     })
//! }
//! ```

use crate::advisor::{sort_advisors, Advisor};
use crate::config::ProxyConfig;
use crate::error::AopResult;
use crate::factory::ProxyFactory;
use crate::joinpoint::ClassInfo;
use crate::proxy::{Proxy, ProxyContext};
use crate::target::Target;
use std::sync::Arc;

/// 顾问注册器
///
/// 用于 inventory 自动收集顾问
pub struct AdvisorRegistration {
    /// 顾问名称
    pub name: &'static str,

    /// 排序值，覆盖创建出的顾问自身的排序值
    pub order: i32,

    /// 创建顾问的函数
    pub creator: fn() -> AopResult<Advisor>,
}

impl AdvisorRegistration {
    pub const fn new(name: &'static str, order: i32, creator: fn() -> AopResult<Advisor>) -> Self {
        Self {
            name,
            order,
            creator,
        }
    }

    /// 创建顾问实例
    pub fn create_advisor(&self) -> AopResult<Advisor> {
        Ok((self.creator)()?.with_order(self.order))
    }
}

inventory::collect!(AdvisorRegistration);

/// 获取所有注册的顾问注册器
pub fn advisor_registrations() -> impl Iterator<Item = &'static AdvisorRegistration> {
    inventory::iter::<AdvisorRegistration>()
}

/// 自动代理创建器
pub struct AutoProxyCreator {
    candidates: Vec<Advisor>,
    context: ProxyContext,
    config: ProxyConfig,
}

impl AutoProxyCreator {
    pub fn new(context: ProxyContext) -> Self {
        Self {
            candidates: Vec::new(),
            context,
            config: ProxyConfig::default(),
        }
    }

    /// 加载所有通过 inventory 注册的顾问
    pub fn with_registered_advisors(mut self) -> AopResult<Self> {
        for registration in advisor_registrations() {
            tracing::debug!(
                "Loading registered advisor '{}' (order {})",
                registration.name,
                registration.order
            );
            self.candidates.push(registration.create_advisor()?);
        }
        Ok(self)
    }

    /// 代理开关；`pre_filtered` 总是被置为 true
    pub fn with_proxy_config(mut self, config: ProxyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn add_advisor(&mut self, advisor: Advisor) {
        self.candidates.push(advisor);
    }

    pub fn candidate_advisors(&self) -> &[Advisor] {
        &self.candidates
    }

    /// 适用于该类型的顾问，按排序值稳定排序
    pub fn find_eligible_advisors(&self, class: &ClassInfo) -> Vec<Advisor> {
        let has_introductions = self.candidates.iter().any(|advisor| {
            matches!(advisor, Advisor::Introduction(_)) && advisor.can_apply(class, false)
        });
        let mut eligible: Vec<Advisor> = self
            .candidates
            .iter()
            .filter(|advisor| advisor.can_apply(class, has_introductions))
            .cloned()
            .collect();
        sort_advisors(&mut eligible);
        eligible
    }

    /// 有适用的顾问时为目标创建代理，否则返回 `None`
    pub fn wrap_if_necessary(
        &self,
        target: Arc<dyn Target>,
        name: &str,
    ) -> AopResult<Option<Proxy>> {
        let class = target.target_class();
        let eligible = self.find_eligible_advisors(&class);
        if eligible.is_empty() {
            tracing::trace!("'{}' ({}) matches no advisor, skipping proxy creation", name, class);
            return Ok(None);
        }

        tracing::info!(
            "🔷 Creating proxy for '{}' ({}) with {} advisor(s)",
            name,
            class,
            eligible.len()
        );
        let factory = ProxyFactory::for_target(target).with_config(&ProxyConfig {
            frozen: false,
            ..self.config.clone()
        });
        // 类型过滤已在此处完成
        factory.set_pre_filtered(true);
        for advisor in eligible {
            factory.add_advisor(advisor)?;
        }
        if self.config.frozen {
            factory.freeze();
        }
        factory.get_proxy_in(Some(&self.context)).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{Advice, MethodInterceptor};
    use crate::advisor::IntroductionAdvisor;
    use crate::error::Result;
    use crate::interceptors::DelegatingIntroductionInterceptor;
    use crate::invocation::MethodInvocation;
    use crate::joinpoint::{Arguments, Method, ReturnValue};
    use crate::pointcut::Pointcut;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    static ORDER_SERVICE: ClassInfo = ClassInfo::new("OrderService")
        .implementing(&["Service"])
        .declaring(&[PLACE]);
    static ORDER_CONTROLLER: ClassInfo = ClassInfo::new("OrderController");
    const PLACE: Method = Method::new("OrderService", "place");

    struct OrderService;

    #[async_trait]
    impl Target for OrderService {
        fn target_class(&self) -> ClassInfo {
            ORDER_SERVICE
        }

        async fn invoke(&self, _method: &Method, _args: &Arguments) -> Result<ReturnValue> {
            Ok(ReturnValue::new("placed"))
        }
    }

    struct OrderController;

    #[async_trait]
    impl Target for OrderController {
        fn target_class(&self) -> ClassInfo {
            ORDER_CONTROLLER
        }

        async fn invoke(&self, _method: &Method, _args: &Arguments) -> Result<ReturnValue> {
            Ok(ReturnValue::unit())
        }
    }

    struct Record {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl MethodInterceptor for Record {
        fn name(&self) -> &str {
            self.label
        }

        async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
            self.log.lock().push(self.label);
            invocation.proceed().await
        }
    }

    fn record(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Advice {
        Advice::around(Record {
            label,
            log: log.clone(),
        })
    }

    fn creator(log: &Arc<Mutex<Vec<&'static str>>>) -> AutoProxyCreator {
        let mut creator = AutoProxyCreator::new(ProxyContext::mechanism_default());
        creator.add_advisor(
            Advisor::pointcut("services", Pointcut::for_type("Service"), record("services", log))
                .with_order(20),
        );
        creator.add_advisor(
            Advisor::pointcut(
                "deletes",
                Pointcut::method_names(["delete*"]).unwrap(),
                record("deletes", log),
            )
            .with_order(1),
        );
        creator.add_advisor(Advisor::plain("metrics", record("metrics", log)).with_order(10));
        creator
    }

    #[test]
    fn test_eligible_advisors_sorted_by_order() {
        let log = Arc::default();
        let creator = creator(&log);

        let names: Vec<_> = creator
            .find_eligible_advisors(&ORDER_SERVICE)
            .iter()
            .map(|advisor| advisor.name().to_string())
            .collect();
        assert_eq!(names, ["metrics", "services"]);

        let names: Vec<_> = creator
            .find_eligible_advisors(&ORDER_CONTROLLER)
            .iter()
            .map(|advisor| advisor.name().to_string())
            .collect();
        // OrderController 未声明方法列表，只按类型过滤器判断
        assert_eq!(names, ["deletes", "metrics"]);
    }

    #[tokio::test]
    async fn test_wrap_if_necessary_builds_pre_filtered_proxy() {
        let log = Arc::default();
        let creator = creator(&log);
        let proxy = creator
            .wrap_if_necessary(Arc::new(OrderService), "orderService")
            .unwrap()
            .unwrap();
        assert!(proxy.advised().is_pre_filtered());

        let placed: &str = proxy.call(&PLACE, Arguments::new()).await.unwrap();
        assert_eq!(placed, "placed");
        assert_eq!(*log.lock(), vec!["metrics", "services"]);
    }

    #[test]
    fn test_no_eligible_advisor_means_no_proxy() {
        let creator = AutoProxyCreator::new(ProxyContext::mechanism_default());
        assert!(creator
            .wrap_if_necessary(Arc::new(OrderController), "orderController")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_introduction_eligibility_uses_class_filter() {
        let mut creator = AutoProxyCreator::new(ProxyContext::mechanism_default());
        let delegate: Arc<dyn Target> = Arc::new(OrderController);
        creator.add_advisor(Advisor::Introduction(
            IntroductionAdvisor::new(
                "auditable",
                Arc::new(DelegatingIntroductionInterceptor::new(delegate, ["Auditable"])),
            )
            .with_class_filter(Arc::new(|class: &ClassInfo| class.is_assignable_to("Service"))),
        ));

        assert_eq!(creator.find_eligible_advisors(&ORDER_SERVICE).len(), 1);
        assert!(creator.find_eligible_advisors(&ORDER_CONTROLLER).is_empty());

        let proxy = creator
            .wrap_if_necessary(Arc::new(OrderService), "orderService")
            .unwrap()
            .unwrap();
        assert!(proxy.is_instance_of("Auditable"));
    }

    #[test]
    fn test_registration_overrides_order() {
        fn make() -> AopResult<Advisor> {
            Ok(Advisor::plain(
                "registered",
                Advice::around(crate::interceptors::TraceInterceptor::new()),
            ))
        }
        let registration = AdvisorRegistration::new("registered", 42, make);
        let advisor = registration.create_advisor().unwrap();
        assert_eq!(advisor.order(), 42);
        assert_eq!(advisor.name(), "registered");
    }
}
