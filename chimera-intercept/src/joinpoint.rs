//! 连接点（JoinPoint）定义
//!
//! Rust 没有运行时反射，因此类型与方法都以静态描述符表示：
//! - [`ClassInfo`] 描述目标对象的运行时类型（名称、接口、父类、声明的方法）
//! - [`Method`] 描述一个可被拦截的方法
//! - [`Arguments`] / [`ReturnValue`] 是类型擦除的参数与返回值
//! - [`JoinPoint`] 是通知执行时看到的只读调用视图

use crate::error::{AopError, AopResult};
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 去掉模块路径与泛型参数后的类型名
///
/// 例如 `app::repo::JdbcRepo<u64>` -> `JdbcRepo`
pub fn simple_type_name(name: &str) -> &str {
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base).trim()
}

/// 比较类型名：限定名必须完全相等，非限定名按简单名比较
pub(crate) fn type_names_match(candidate: &str, wanted: &str) -> bool {
    if candidate == wanted {
        return true;
    }
    !wanted.contains("::") && simple_type_name(candidate) == wanted
}

/// 方法描述符
///
/// 方法的身份由（声明类型，方法名）决定，可以在 `const` 上下文中构造：
///
/// ```
/// use chimera_intercept::Method;
///
/// const SAVE: Method = Method::new("Repo", "save")
///     .with_parameters(&["Item"])
///     .returning("u64");
///
/// assert_eq!(SAVE.signature(), "Repo::save(Item) -> u64");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Method {
    declaring_type: &'static str,
    name: &'static str,
    parameter_types: &'static [&'static str],
    return_type: &'static str,
}

impl Method {
    pub const fn new(declaring_type: &'static str, name: &'static str) -> Self {
        Self {
            declaring_type,
            name,
            parameter_types: &[],
            return_type: "()",
        }
    }

    pub const fn with_parameters(mut self, parameter_types: &'static [&'static str]) -> Self {
        self.parameter_types = parameter_types;
        self
    }

    pub const fn returning(mut self, return_type: &'static str) -> Self {
        self.return_type = return_type;
        self
    }

    pub fn declaring_type(&self) -> &'static str {
        self.declaring_type
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parameter_types(&self) -> &'static [&'static str] {
        self.parameter_types
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_types.len()
    }

    pub fn return_type(&self) -> &'static str {
        self.return_type
    }

    /// 声明类型的类描述符（未提供目标类型时用作解析的实际类型）
    pub fn declaring_class(&self) -> ClassInfo {
        ClassInfo::new(self.declaring_type)
    }

    /// 完整的方法签名，例如 `Repo::save(Item) -> u64`
    pub fn signature(&self) -> String {
        format!(
            "{}::{}({}) -> {}",
            self.declaring_type,
            self.name,
            self.parameter_types.join(", "),
            self.return_type
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)
    }
}

/// 类描述符
///
/// 描述被代理对象的运行时类型。运行时类型可以比方法的声明类型更具体
/// （例如实现了某个接口的具体结构体，或者“子类”）。
#[derive(Debug, Clone, Copy)]
pub struct ClassInfo {
    name: &'static str,
    interfaces: &'static [&'static str],
    superclass: Option<&'static ClassInfo>,
    methods: &'static [Method],
}

impl ClassInfo {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            interfaces: &[],
            superclass: None,
            methods: &[],
        }
    }

    /// 以 Rust 类型名创建描述符
    pub fn of<T: ?Sized>() -> Self {
        Self::new(std::any::type_name::<T>())
    }

    pub const fn implementing(mut self, interfaces: &'static [&'static str]) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub const fn extending(mut self, superclass: &'static ClassInfo) -> Self {
        self.superclass = Some(superclass);
        self
    }

    pub const fn declaring(mut self, methods: &'static [Method]) -> Self {
        self.methods = methods;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn simple_name(&self) -> &'static str {
        simple_type_name(self.name)
    }

    pub fn interfaces(&self) -> &'static [&'static str] {
        self.interfaces
    }

    pub fn superclass(&self) -> Option<&'static ClassInfo> {
        self.superclass
    }

    /// 本类声明的方法（不含父类）
    pub fn declared_methods(&self) -> &'static [Method] {
        self.methods
    }

    /// 沿父类链收集的全部已知方法
    pub fn all_methods(&self) -> Vec<Method> {
        let mut methods: Vec<Method> = self.methods.to_vec();
        let mut current = self.superclass;
        while let Some(class) = current {
            methods.extend_from_slice(class.methods);
            current = class.superclass;
        }
        methods
    }

    /// 自身、父类链及所有接口的类型名
    pub fn hierarchy_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        let mut current = Some(self);
        while let Some(class) = current {
            names.push(class.name);
            names.extend_from_slice(class.interfaces);
            current = class.superclass;
        }
        names
    }

    /// 是否可以赋值给指定类型（自身、任一父类或任一接口）
    pub fn is_assignable_to(&self, type_name: &str) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if type_names_match(class.name, type_name)
                || class
                    .interfaces
                    .iter()
                    .any(|iface| type_names_match(iface, type_name))
            {
                return true;
            }
            current = class.superclass;
        }
        false
    }
}

impl PartialEq for ClassInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ClassInfo {}

impl Hash for ClassInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// 类型擦除的方法参数列表
#[derive(Clone, Default)]
pub struct Arguments {
    values: Vec<Arc<dyn Any + Send + Sync>>,
    type_names: Vec<&'static str>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个参数（构建器风格）
    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    pub fn push<T: Any + Send + Sync>(&mut self, value: T) {
        self.values.push(Arc::new(value));
        self.type_names.push(std::any::type_name::<T>());
    }

    /// 替换指定位置的参数，环绕通知可以借此改写调用参数
    pub fn set<T: Any + Send + Sync>(&mut self, index: usize, value: T) -> AopResult<()> {
        if index >= self.values.len() {
            return Err(AopError::ArgumentMismatch {
                method: String::from("<set>"),
                index,
                reason: format!("only {} argument(s) present", self.values.len()),
            });
        }
        self.values[index] = Arc::new(value);
        self.type_names[index] = std::any::type_name::<T>();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 尝试以指定类型读取参数
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.values.get(index)?.downcast_ref::<T>()
    }

    pub fn type_name(&self, index: usize) -> Option<&'static str> {
        self.type_names.get(index).copied()
    }

    /// 读取参数的拷贝，供目标分派使用
    pub fn extract<T: Any + Clone>(&self, method: &Method, index: usize) -> AopResult<T> {
        match self.values.get(index) {
            None => Err(AopError::ArgumentMismatch {
                method: method.to_string(),
                index,
                reason: format!("only {} argument(s) present", self.values.len()),
            }),
            Some(value) => value.downcast_ref::<T>().cloned().ok_or_else(|| {
                AopError::ArgumentMismatch {
                    method: method.to_string(),
                    index,
                    reason: format!(
                        "expected '{}', found '{}'",
                        std::any::type_name::<T>(),
                        self.type_names[index]
                    ),
                }
            }),
        }
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.type_names.iter()).finish()
    }
}

/// 类型擦除的返回值
pub struct ReturnValue {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ReturnValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn unit() -> Self {
        Self::new(())
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn downcast<T: Any>(self) -> AopResult<T> {
        let actual = self.type_name;
        self.value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| AopError::ReturnTypeMismatch {
                expected: std::any::type_name::<T>(),
                actual,
            })
    }
}

impl fmt::Debug for ReturnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnValue")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// 连接点信息
///
/// 通知执行时看到的只读调用视图
#[derive(Clone, Copy)]
pub struct JoinPoint<'a> {
    method: &'a Method,
    args: &'a Arguments,
    target_class: &'a ClassInfo,
    started_at: Instant,
}

impl<'a> JoinPoint<'a> {
    pub fn new(
        method: &'a Method,
        args: &'a Arguments,
        target_class: &'a ClassInfo,
        started_at: Instant,
    ) -> Self {
        Self {
            method,
            args,
            target_class,
            started_at,
        }
    }

    pub fn method(&self) -> &'a Method {
        self.method
    }

    pub fn args(&self) -> &'a Arguments {
        self.args
    }

    pub fn target_class(&self) -> &'a ClassInfo {
        self.target_class
    }

    /// 自调用开始以来经过的时间
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// 获取完整的方法签名
    pub fn signature(&self) -> String {
        format!("{}::{}", self.target_class.simple_name(), self.method.name())
    }
}

impl fmt::Debug for JoinPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPoint")
            .field("method", &self.method.signature())
            .field("target_class", &self.target_class.name())
            .field("args", self.args)
            .finish()
    }
}

impl fmt::Display for JoinPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}
