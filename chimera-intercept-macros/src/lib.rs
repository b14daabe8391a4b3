//! Chimera Intercept 过程宏
//!
//! - `#[proxied]` - 为 async trait 生成类型安全的代理与目标适配器

extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{parse_macro_input, ItemTrait};

mod proxied;

/// `#[proxied]` 属性宏
///
/// 标注在 async trait 上（位于 `#[async_trait]` 之前），生成：
/// - `<Trait>Proxy`：实现该 trait，每次调用都经过拦截链
/// - `<Trait>Target<T>`：把 trait 的实现者适配为 `Target`
/// - `<Trait>Proxy::<METHOD>` 方法描述符常量及 `<Trait>Proxy::METHODS`
///
/// 使用示例：
/// ```ignore
/// use chimera_intercept::prelude::*;
///
/// #[proxied]
/// #[async_trait]
/// pub trait Repo: Send + Sync {
///     async fn save(&self, name: String) -> anyhow::Result<u64>;
///     async fn find(&self, id: u64) -> anyhow::Result<Option<String>>;
/// }
///
/// let factory = ProxyFactory::new(RepoTarget::new(MemoryRepo::default()));
/// let repo = RepoProxy::create(&factory)?;
/// let id = repo.save("a".to_string()).await?;
/// ```
///
/// 限制：方法必须是 `async`、以 `&self` 为接收者、返回 `Result<T>`，
/// 参数必须是拥有所有权的 `'static + Clone` 类型。
#[proc_macro_attribute]
pub fn proxied(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[proxied] does not take arguments",
        )
        .to_compile_error()
        .into();
    }

    let item_trait = parse_macro_input!(item as ItemTrait);
    proxied::impl_proxied(item_trait)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
