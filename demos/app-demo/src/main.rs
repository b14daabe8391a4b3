use chimera_intercept::prelude::*;
use chimera_intercept::{DEFAULT_ENV_PREFIX, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ==================== 业务接口 ====================

#[proxied]
#[async_trait]
pub trait UserService: Send + Sync {
    async fn create_user(&self, name: String) -> Result<u64>;
    async fn get_user(&self, id: u64) -> Result<String>;
    async fn rename_user(&self, id: u64, name: String) -> Result<()>;
    async fn generate_report(&self, rows: u64) -> Result<usize>;
}

/// 被引入的审计接口
#[proxied]
#[async_trait]
pub trait Audited: Send + Sync {
    async fn audit_events(&self) -> Result<u64>;
}

#[derive(Debug, thiserror::Error)]
enum UserError {
    #[error("user {0} not found")]
    NotFound(u64),
}

#[derive(Default)]
struct InMemoryUserService {
    next_id: AtomicU64,
    users: Mutex<HashMap<u64, String>>,
}

#[async_trait]
impl UserService for InMemoryUserService {
    async fn create_user(&self, name: String) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.users
            .lock()
            .map_err(|_| anyhow::anyhow!("user table poisoned"))?
            .insert(id, name);
        Ok(id)
    }

    async fn get_user(&self, id: u64) -> Result<String> {
        let users = self
            .users
            .lock()
            .map_err(|_| anyhow::anyhow!("user table poisoned"))?;
        users.get(&id).cloned().ok_or_else(|| UserError::NotFound(id).into())
    }

    async fn rename_user(&self, id: u64, name: String) -> Result<()> {
        let mut users = self
            .users
            .lock()
            .map_err(|_| anyhow::anyhow!("user table poisoned"))?;
        match users.get_mut(&id) {
            Some(existing) => {
                *existing = name;
                Ok(())
            }
            None => Err(UserError::NotFound(id).into()),
        }
    }

    async fn generate_report(&self, rows: u64) -> Result<usize> {
        tokio::time::sleep(Duration::from_millis(rows)).await;
        Ok(rows as usize)
    }
}

#[derive(Default)]
struct AuditTrail {
    events: AtomicU64,
}

#[async_trait]
impl Audited for AuditTrail {
    async fn audit_events(&self) -> Result<u64> {
        Ok(self.events.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

// ==================== 通知 ====================

/// 参数校验 - 前置通知，拒绝空名称
struct NameValidation;

#[async_trait]
impl MethodBeforeAdvice for NameValidation {
    async fn before(&self, join_point: &JoinPoint<'_>) -> Result<()> {
        let args = join_point.args();
        let last = args.len().checked_sub(1);
        if let Some(name) = last.and_then(|index| args.get::<String>(index)) {
            if name.trim().is_empty() {
                anyhow::bail!("{} rejected: name must not be empty", join_point.signature());
            }
        }
        Ok(())
    }
}

/// 自调用 - 重命名之后通过当前代理重新读取用户
struct ReloadAfterRename;

#[async_trait]
impl AfterReturningAdvice for ReloadAfterRename {
    async fn after_returning(
        &self,
        join_point: &JoinPoint<'_>,
        _result: &ReturnValue,
    ) -> Result<()> {
        let id = join_point.args().get::<u64>(0);
        if let (Some(proxy), Some(id)) = (AopContext::current_proxy(), id) {
            let name = UserServiceProxy::new(proxy).get_user(*id).await?;
            tracing::info!("🔁 User {} is now '{}'", id, name);
        }
        Ok(())
    }
}

fn tracing_advisor() -> AopResult<Advisor> {
    Ok(Advisor::plain(
        "tracing",
        Advice::around(TraceInterceptor::new().with_args()),
    ))
}

inventory::submit! {
    AdvisorRegistration::new("tracing", 100, tracing_advisor)
}

// ==================== 主程序 ====================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("\n╔════════════════════════════════════════════════════╗");
    println!("║     Chimera Intercept - Complete Demo              ║");
    println!("╚════════════════════════════════════════════════════╝\n");

    // 查找配置文件
    let config_paths = ["demos/app-demo/application.toml", "application.toml"];
    let config_file = config_paths
        .iter()
        .find(|path| std::path::Path::new(path).exists())
        .copied()
        .unwrap_or("application.toml");

    let config = InterceptConfig::load(config_file, DEFAULT_ENV_PREFIX)?;
    config.logging.clone().init()?;
    tracing::info!("Loaded configuration from {}", config_file);

    let mut creator = AutoProxyCreator::new(ProxyContext::ambient())
        .with_registered_advisors()?
        .with_proxy_config(config.proxy.clone());

    creator.add_advisor(
        Advisor::pointcut(
            "validation",
            Pointcut::expression(concat!(
                "execution(* UserService.create_user(..)) || ",
                "execution(* UserService.rename_user(..))",
            ))?,
            Advice::before(NameValidation),
        )
        .with_order(HIGHEST_PRECEDENCE),
    );
    creator.add_advisor(
        Advisor::pointcut(
            "performance",
            Pointcut::method_names(["generate_*"])?,
            Advice::around(PerformanceMonitorInterceptor::new(Duration::from_millis(50))),
        )
        .with_order(200),
    );
    creator.add_advisor(
        Advisor::pointcut(
            "reload",
            Pointcut::method_names(["rename_user"])?,
            Advice::after_returning(ReloadAfterRename),
        )
        .with_order(300),
    );
    creator.add_advisor(Advisor::plain(
        "exceptions",
        Advice::after_throwing(ExceptionLoggingAdvice::new()),
    ));
    let audit: Arc<dyn Target> = Arc::new(AuditedTarget::new(AuditTrail::default()));
    creator.add_advisor(Advisor::introduction(
        "audit",
        Arc::new(DelegatingIntroductionInterceptor::for_delegate(audit)),
    ));

    let target: Arc<dyn Target> =
        Arc::new(UserServiceTarget::new(InMemoryUserService::default()));
    let proxy = creator
        .wrap_if_necessary(target, "userService")?
        .ok_or_else(|| anyhow::anyhow!("userService was not proxied"))?;

    println!("\n╔════════════════════════════════════════════════════╗");
    println!("║              Proxy Created                         ║");
    println!("╚════════════════════════════════════════════════════╝\n");
    println!("🔷 {:?}", proxy);

    let users = UserServiceProxy::new(proxy.clone());

    let id = users.create_user("alice".to_string()).await?;
    println!("\n👤 Created user {}", id);
    println!("   get_user({}) = {}", id, users.get_user(id).await?);

    users.rename_user(id, "alice cooper".to_string()).await?;

    match users.create_user("   ".to_string()).await {
        Ok(id) => println!("   Unexpectedly created user {}", id),
        Err(e) => println!("\n🚫 Validation: {}", e),
    }

    match users.get_user(42).await {
        Ok(name) => println!("   Unexpectedly found {}", name),
        Err(e) => println!("\n❓ Lookup failed: {}", e),
    }

    users.generate_report(5).await?;
    users.generate_report(80).await?;

    let audited = AuditedProxy::new(proxy.clone());
    println!("\n📋 Audit events: {}", audited.audit_events().await?);
    println!("   Proxy is Audited: {}", proxy.is_instance_of("Audited"));
    println!(
        "   Cached interceptor chains: {}",
        proxy.advised().cached_chain_count()
    );

    println!("\n╔════════════════════════════════════════════════════╗");
    println!("║                Key Features                        ║");
    println!("╚════════════════════════════════════════════════════╝\n");

    println!("✅ #[proxied] - 为 async trait 生成类型安全的代理");
    println!("✅ 切点表达式与方法名匹配");
    println!("✅ 前置 / 返回后 / 异常 / 环绕通知统一为拦截链");
    println!("✅ 引入通知为代理增加接口");
    println!("✅ 通过 AopContext 在通知中调用当前代理");
    println!("✅ 拦截链缓存 + 环境变量覆盖 (CHIMERA_AOP_* 前缀)");

    println!("\n💡 Try these commands:");
    println!("   CHIMERA_AOP_LOGGING_LEVEL=trace cargo run -p app-demo");
    println!("   CHIMERA_AOP_PROXY_TRACE_RESOLUTION=true cargo run -p app-demo");

    println!();
    Ok(())
}
