//! #[proxied] 宏实现

use proc_macro2::TokenStream;
use quote::{format_ident, quote, ToTokens};
use syn::ext::IdentExt;
use syn::{
    Error, FnArg, GenericArgument, Ident, ItemTrait, PathArguments, Result, ReturnType, TraitItem,
    TraitItemFn, Type,
};

/// 被代理的 trait 方法
struct ProxiedMethod {
    ident: Ident,
    name: String,
    const_ident: Ident,
    arg_types: Vec<Type>,
    ok_type: Type,
    output: ReturnType,
}

pub fn impl_proxied(item: ItemTrait) -> Result<TokenStream> {
    if !item.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &item.generics,
            "#[proxied] does not support generic traits",
        ));
    }

    let methods = item
        .items
        .iter()
        .map(|trait_item| match trait_item {
            TraitItem::Fn(method) => parse_method(method),
            other => Err(Error::new_spanned(
                other,
                "#[proxied] traits may only contain methods",
            )),
        })
        .collect::<Result<Vec<_>>>()?;

    let vis = &item.vis;
    let trait_ident = &item.ident;
    let trait_name = trait_ident.unraw().to_string();
    let proxy_ident = format_ident!("{}Proxy", trait_ident.unraw());
    let target_ident = format_ident!("{}Target", trait_ident.unraw());

    // 方法描述符
    let descriptors = methods.iter().map(|method| {
        let const_ident = &method.const_ident;
        let name = &method.name;
        let parameter_names = method.arg_types.iter().map(type_name);
        let return_name = type_name(&method.ok_type);
        quote! {
            #vis const #const_ident: ::chimera_intercept::Method =
                ::chimera_intercept::Method::new(#trait_name, #name)
                    .with_parameters(&[#(#parameter_names),*])
                    .returning(#return_name);
        }
    });
    let const_idents = methods.iter().map(|method| &method.const_ident);

    // 代理侧：打包参数，经拦截链调用
    let proxy_methods = methods.iter().map(|method| {
        let ident = &method.ident;
        let const_ident = &method.const_ident;
        let ok_type = &method.ok_type;
        let output = &method.output;
        let arg_idents: Vec<Ident> = (0..method.arg_types.len())
            .map(|index| format_ident!("arg{}", index))
            .collect();
        let arg_types = &method.arg_types;
        quote! {
            async fn #ident(&self, #(#arg_idents: #arg_types),*) #output {
                let args = ::chimera_intercept::Arguments::new()#(.with(#arg_idents))*;
                self.proxy
                    .call::<#ok_type>(&Self::#const_ident, args)
                    .await
                    .map_err(::core::convert::Into::into)
            }
        }
    });

    // 目标侧：按方法名分派到 trait 实现
    let dispatch_arms = methods.iter().map(|method| {
        let ident = &method.ident;
        let name = &method.name;
        let extracts = method.arg_types.iter().enumerate().map(|(index, ty)| {
            quote! { args.extract::<#ty>(method, #index)? }
        });
        quote! {
            #name => {
                let value = <T as #trait_ident>::#ident(&*self.inner, #(#extracts),*).await?;
                Ok(::chimera_intercept::ReturnValue::new(value))
            }
        }
    });

    let proxy_doc = format!("`{}` 的代理，每次调用都经过拦截链", trait_name);
    let target_doc = format!("把 `{}` 的实现者适配为拦截目标", trait_name);

    Ok(quote! {
        #item

        #[doc = #proxy_doc]
        #[derive(Clone, Debug)]
        #vis struct #proxy_ident {
            proxy: ::chimera_intercept::Proxy,
        }

        impl #proxy_ident {
            #(#descriptors)*

            /// 全部方法描述符
            #vis const METHODS: &'static [::chimera_intercept::Method] = &[#(Self::#const_idents),*];

            #vis fn new(proxy: ::chimera_intercept::Proxy) -> Self {
                Self { proxy }
            }

            /// 使用环境上下文从工厂构建代理
            #vis fn create(
                factory: &::chimera_intercept::ProxyFactory,
            ) -> ::chimera_intercept::AopResult<Self> {
                Ok(Self::new(factory.get_proxy()?))
            }

            #vis fn proxy(&self) -> &::chimera_intercept::Proxy {
                &self.proxy
            }
        }

        #[::chimera_intercept::async_trait::async_trait]
        impl #trait_ident for #proxy_ident {
            #(#proxy_methods)*
        }

        #[doc = #target_doc]
        #vis struct #target_ident<T: ?Sized> {
            inner: ::std::sync::Arc<T>,
        }

        impl<T> #target_ident<T> {
            #vis fn new(inner: T) -> Self {
                Self {
                    inner: ::std::sync::Arc::new(inner),
                }
            }
        }

        impl<T: ?Sized> #target_ident<T> {
            #vis fn from_arc(inner: ::std::sync::Arc<T>) -> Self {
                Self { inner }
            }

            #vis fn inner(&self) -> &::std::sync::Arc<T> {
                &self.inner
            }
        }

        #[::chimera_intercept::async_trait::async_trait]
        impl<T> ::chimera_intercept::Target for #target_ident<T>
        where
            T: #trait_ident + Send + Sync + ?Sized + 'static,
        {
            fn target_class(&self) -> ::chimera_intercept::ClassInfo {
                ::chimera_intercept::ClassInfo::of::<T>()
                    .implementing(&[#trait_name])
                    .declaring(#proxy_ident::METHODS)
            }

            async fn invoke(
                &self,
                method: &::chimera_intercept::Method,
                args: &::chimera_intercept::Arguments,
            ) -> ::chimera_intercept::Result<::chimera_intercept::ReturnValue> {
                match method.name() {
                    #(#dispatch_arms)*
                    _ => Err(::chimera_intercept::AopError::NoSuchMethod {
                        method: method.signature(),
                        target: ::chimera_intercept::ClassInfo::of::<T>().name().to_string(),
                    }
                    .into()),
                }
            }
        }
    })
}

fn parse_method(method: &TraitItemFn) -> Result<ProxiedMethod> {
    let sig = &method.sig;
    if sig.asyncness.is_none() {
        return Err(Error::new_spanned(
            sig,
            "#[proxied] only supports async methods (place #[proxied] above #[async_trait])",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &sig.generics,
            "#[proxied] does not support generic methods",
        ));
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => {
            return Err(Error::new_spanned(
                sig,
                "#[proxied] methods must take `&self`",
            ))
        }
    }

    let mut arg_types = Vec::new();
    for input in inputs {
        let FnArg::Typed(pat_type) = input else {
            return Err(Error::new_spanned(input, "unexpected receiver"));
        };
        if matches!(*pat_type.ty, Type::Reference(_)) {
            return Err(Error::new_spanned(
                &pat_type.ty,
                "#[proxied] method arguments must be owned values",
            ));
        }
        arg_types.push((*pat_type.ty).clone());
    }

    let ok_type = match &sig.output {
        ReturnType::Type(_, ty) => result_ok_type(ty),
        ReturnType::Default => None,
    }
    .ok_or_else(|| {
        Error::new_spanned(&sig.output, "#[proxied] methods must return Result<T>")
    })?;

    let ident = sig.ident.clone();
    let name = ident.unraw().to_string();
    Ok(ProxiedMethod {
        const_ident: format_ident!("{}", name.to_uppercase()),
        name,
        ident,
        arg_types,
        ok_type,
        output: sig.output.clone(),
    })
}

/// 从 `Result<T>` / `Result<T, E>` 中取出 `T`
fn result_ok_type(ty: &Type) -> Option<Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Result" {
        return None;
    }
    let PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        return None;
    };
    match arguments.args.first()? {
        GenericArgument::Type(ok_type) => Some(ok_type.clone()),
        _ => None,
    }
}

fn type_name(ty: &Type) -> String {
    ty.to_token_stream().to_string().replace(' ', "")
}
