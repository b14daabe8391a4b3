use chimera_intercept::pointcut::{NameMatchMethodMatcher, RuntimeMethodMatcher};
use chimera_intercept::prelude::*;
use chimera_intercept::target::PrototypeTargetSource;
use chimera_intercept::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[proxied]
#[async_trait]
pub trait Repo: Send + Sync {
    async fn save(&self, name: String) -> Result<u64>;
    async fn find(&self, id: u64) -> Result<Option<String>>;
    async fn delete(&self, id: u64) -> Result<bool>;
}

#[proxied]
#[async_trait]
pub trait Auditable: Send + Sync {
    async fn audit_count(&self) -> Result<u64>;
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("record {0} not found")]
struct NotFound(u64);

#[derive(Default)]
struct MemoryRepo {
    next_id: AtomicU64,
    records: Mutex<HashMap<u64, String>>,
}

#[async_trait]
impl Repo for MemoryRepo {
    async fn save(&self, name: String) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.records.lock().insert(id, name);
        Ok(id)
    }

    async fn find(&self, id: u64) -> Result<Option<String>> {
        Ok(self.records.lock().get(&id).cloned())
    }

    async fn delete(&self, id: u64) -> Result<bool> {
        match self.records.lock().remove(&id) {
            Some(_) => Ok(true),
            None => Err(NotFound(id).into()),
        }
    }
}

#[derive(Default)]
struct AuditLog {
    count: AtomicU64,
}

#[async_trait]
impl Auditable for AuditLog {
    async fn audit_count(&self) -> Result<u64> {
        Ok(self.count.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// 记录经过的方法名
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl MethodInterceptor for Recorder {
    async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
        self.calls.lock().push(invocation.method().name());
        invocation.proceed().await
    }
}

fn repo_factory() -> ProxyFactory {
    ProxyFactory::new(RepoTarget::new(MemoryRepo::default()))
}

#[tokio::test]
async fn test_pointcut_selects_save_methods() {
    let recorder = Arc::new(Recorder::default());
    let factory = repo_factory();
    factory
        .add_advisor(Advisor::pointcut(
            "tx",
            Pointcut::method_names(["save*"]).unwrap(),
            Advice::Around(recorder.clone()),
        ))
        .unwrap();
    let repo = RepoProxy::create(&factory).unwrap();

    let id = repo.save("alice".to_string()).await.unwrap();
    assert_eq!(id, 1);
    assert_eq!(repo.find(id).await.unwrap().as_deref(), Some("alice"));
    assert_eq!(*recorder.calls.lock(), vec!["save"]);
}

#[tokio::test]
async fn test_target_errors_propagate_unchanged() {
    let factory = repo_factory();
    factory
        .add_advice(Advice::around(TraceInterceptor::new()))
        .unwrap();
    let repo = RepoProxy::create(&factory).unwrap();

    let err = repo.delete(7).await.unwrap_err();
    assert_eq!(err.downcast_ref::<NotFound>(), Some(&NotFound(7)));
}

#[test]
fn test_generated_method_descriptors() {
    assert_eq!(RepoProxy::METHODS.len(), 3);
    assert_eq!(RepoProxy::SAVE.declaring_type(), "Repo");
    assert_eq!(RepoProxy::SAVE.parameter_types(), ["String"]);
    assert_eq!(RepoProxy::SAVE.return_type(), "u64");
    assert_eq!(RepoProxy::FIND.return_type(), "Option<String>");
    assert_eq!(AuditableProxy::AUDIT_COUNT.parameter_count(), 0);

    let target = RepoTarget::new(MemoryRepo::default());
    let class = target.target_class();
    assert!(class.is_assignable_to("Repo"));
    assert_eq!(class.declared_methods().len(), 3);
}

#[tokio::test]
async fn test_execution_expression_matches_through_interface() {
    let recorder = Arc::new(Recorder::default());
    let factory = repo_factory();
    factory
        .add_advisor(Advisor::pointcut(
            "reads",
            Pointcut::expression("execution(* Repo.find(u64))").unwrap(),
            Advice::Around(recorder.clone()),
        ))
        .unwrap();
    let repo = RepoProxy::create(&factory).unwrap();
    assert!(repo.proxy().is_instance_of("Repo"));

    let id = repo.save("bob".to_string()).await.unwrap();
    repo.find(id).await.unwrap();
    repo.delete(id).await.unwrap();
    assert_eq!(*recorder.calls.lock(), vec!["find"]);
}

#[tokio::test]
async fn test_runtime_matcher_reevaluated_per_call() {
    let recorder = Arc::new(Recorder::default());
    let matcher = RuntimeMethodMatcher::new(
        Arc::new(NameMatchMethodMatcher::new(["find"]).unwrap()),
        |_, _, args| args.get::<u64>(0).is_some_and(|id| *id > 100),
    );
    let factory = repo_factory();
    factory
        .add_advisor(Advisor::pointcut(
            "large-ids",
            Pointcut::all().with_method_matcher(Arc::new(matcher)),
            Advice::Around(recorder.clone()),
        ))
        .unwrap();
    let repo = RepoProxy::create(&factory).unwrap();

    repo.find(5).await.unwrap();
    repo.find(500).await.unwrap();
    repo.find(6).await.unwrap();
    assert_eq!(*recorder.calls.lock(), vec!["find"]);
    // 运行时匹配结果不进入缓存，条件项本身被缓存
    assert_eq!(factory.advised().cached_chain_count(), 1);
}

#[tokio::test]
async fn test_introduced_interface_is_callable() {
    let factory = repo_factory();
    let delegate: Arc<dyn Target> = Arc::new(AuditableTarget::new(AuditLog::default()));
    factory
        .add_advice(Advice::introduction(
            DelegatingIntroductionInterceptor::for_delegate(delegate),
        ))
        .unwrap();
    let repo = RepoProxy::create(&factory).unwrap();
    assert!(repo.proxy().is_instance_of("Auditable"));

    let auditable = AuditableProxy::new(repo.proxy().clone());
    assert_eq!(auditable.audit_count().await.unwrap(), 1);
    assert_eq!(auditable.audit_count().await.unwrap(), 2);
    assert_eq!(repo.save("carol".to_string()).await.unwrap(), 1);
}

/// 在调用期间读取当前代理
struct ProxyProbe {
    seen: AtomicUsize,
}

#[async_trait]
impl MethodInterceptor for ProxyProbe {
    async fn invoke(&self, invocation: &mut MethodInvocation) -> Result<ReturnValue> {
        if let Some(current) = AopContext::current_proxy() {
            if invocation.proxy().is_some_and(|proxy| proxy.ptr_eq(&current)) {
                self.seen.fetch_add(1, Ordering::SeqCst);
            }
        }
        invocation.proceed().await
    }
}

#[tokio::test]
async fn test_expose_proxy_during_invocation() {
    let probe = Arc::new(ProxyProbe {
        seen: AtomicUsize::new(0),
    });
    let factory = repo_factory();
    factory
        .add_advisor(Advisor::plain("probe", Advice::Around(probe.clone())))
        .unwrap();
    let repo = RepoProxy::create(&factory).unwrap();

    repo.find(1).await.unwrap();
    assert_eq!(probe.seen.load(Ordering::SeqCst), 0);

    factory.set_expose_proxy(true);
    repo.find(1).await.unwrap();
    assert_eq!(probe.seen.load(Ordering::SeqCst), 1);
    assert!(AopContext::current_proxy().is_none());
}

#[tokio::test]
async fn test_prototype_target_per_call() {
    let source = Arc::new(PrototypeTargetSource::new(
        RepoTarget::new(MemoryRepo::default()).target_class(),
        || Ok(Arc::new(RepoTarget::new(MemoryRepo::default())) as Arc<dyn Target>),
    ));
    let factory = ProxyFactory::with_target_source(source.clone());
    let repo = RepoProxy::create(&factory).unwrap();

    // 每次调用都是新的目标
    assert_eq!(repo.save("a".to_string()).await.unwrap(), 1);
    assert_eq!(repo.save("b".to_string()).await.unwrap(), 1);
    assert_eq!(source.created(), 2);
    assert_eq!(source.released(), 2);
}

#[tokio::test]
async fn test_unknown_method_reports_engine_error() {
    let factory = repo_factory();
    let proxy = factory.get_proxy().unwrap();
    let rename = Method::new("Repo", "rename");

    let err = proxy.invoke(&rename, Arguments::new()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AopError>(),
        Some(AopError::NoSuchMethod { .. })
    ));
}
