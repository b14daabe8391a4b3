//! 切点（Pointcut）
//!
//! 切点由两部分组成：
//! - [`ClassFilter`]：粗粒度的类型过滤，只依赖类
//! - [`MethodMatcher`]：细粒度的方法匹配，可以是静态的（可缓存），
//!   也可以是运行时的（需要在每次调用时根据实际参数重新判断）

use crate::error::{AopError, AopResult};
use crate::joinpoint::{type_names_match, Arguments, ClassInfo, Method};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// 类型过滤器
pub trait ClassFilter: Send + Sync {
    fn matches(&self, class: &ClassInfo) -> bool;
}

impl<F> ClassFilter for F
where
    F: Fn(&ClassInfo) -> bool + Send + Sync,
{
    fn matches(&self, class: &ClassInfo) -> bool {
        self(class)
    }
}

/// 方法匹配器
///
/// 静态匹配（[`MethodMatcher::matches`]）的结果对同一个（方法，目标类型）是稳定的，
/// 可以缓存。若 [`MethodMatcher::is_runtime`] 返回 true，则静态匹配通过后
/// 还需要在每次调用时以实际参数调用 [`MethodMatcher::matches_args`]。
pub trait MethodMatcher: Send + Sync {
    fn matches(&self, method: &Method, target_class: &ClassInfo) -> bool;

    /// 感知引入（introduction）的匹配
    ///
    /// `has_introductions` 表示当前目标类型是否已有引入通知适用。
    /// 默认忽略该参数；需要区别对待的匹配器可以重写此方法。
    fn matches_with_introductions(
        &self,
        method: &Method,
        target_class: &ClassInfo,
        has_introductions: bool,
    ) -> bool {
        let _ = has_introductions;
        self.matches(method, target_class)
    }

    fn is_runtime(&self) -> bool {
        false
    }

    /// 运行时匹配，仅在静态匹配通过且 `is_runtime()` 为 true 时调用
    fn matches_args(&self, method: &Method, target_class: &ClassInfo, args: &Arguments) -> bool {
        let _ = (method, target_class, args);
        true
    }
}

impl<F> MethodMatcher for F
where
    F: Fn(&Method, &ClassInfo) -> bool + Send + Sync,
{
    fn matches(&self, method: &Method, target_class: &ClassInfo) -> bool {
        self(method, target_class)
    }
}

/// 匹配所有类型
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueClassFilter;

impl ClassFilter for TrueClassFilter {
    fn matches(&self, _class: &ClassInfo) -> bool {
        true
    }
}

/// 匹配所有方法
#[derive(Debug, Clone, Copy, Default)]
pub struct TrueMethodMatcher;

impl MethodMatcher for TrueMethodMatcher {
    fn matches(&self, _method: &Method, _target_class: &ClassInfo) -> bool {
        true
    }
}

/// 匹配可以赋值给指定类型的类（自身、父类或接口）
#[derive(Debug, Clone)]
pub struct AssignableClassFilter {
    type_name: String,
}

impl AssignableClassFilter {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl ClassFilter for AssignableClassFilter {
    fn matches(&self, class: &ClassInfo) -> bool {
        class.is_assignable_to(&self.type_name)
    }
}

/// 简单通配符模式（支持 `*`）
///
/// 支持的模式：
/// - `*` - 匹配任意字符串
/// - `save*` - 以 save 开头
/// - `*Service` - 以 Service 结尾
/// - `*Service*` - 包含 Service
///
/// 模式在构造时编译，非法模式立即报错，而不是在匹配时静默失败。
#[derive(Clone)]
pub struct WildcardPattern {
    source: String,
    regex: Option<Regex>,
}

impl WildcardPattern {
    pub fn new(pattern: &str) -> AopResult<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(AopError::InvalidPointcut {
                expression: pattern.to_string(),
                reason: "empty pattern".to_string(),
            });
        }
        if pattern == "*" || !pattern.contains('*') {
            return Ok(Self {
                source: pattern.to_string(),
                regex: None,
            });
        }

        let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
        let regex = Regex::new(&format!("^{}$", escaped.join(".*"))).map_err(|e| {
            AopError::InvalidPointcut {
                expression: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex: Some(regex),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(candidate),
            None => self.source == "*" || self.source == candidate,
        }
    }

    /// 按类型名匹配：含 `::` 的模式匹配限定名，否则匹配简单名
    pub fn matches_type(&self, type_name: &str) -> bool {
        if self.source == "*" {
            true
        } else if self.source.contains("::") {
            self.is_match(type_name)
        } else if self.regex.is_none() {
            type_names_match(type_name, &self.source)
        } else {
            self.is_match(crate::joinpoint::simple_type_name(type_name))
        }
    }
}

impl fmt::Debug for WildcardPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WildcardPattern({})", self.source)
    }
}

/// 按方法名匹配（支持通配符），例如 `["save*", "delete"]`
#[derive(Debug, Clone)]
pub struct NameMatchMethodMatcher {
    patterns: Vec<WildcardPattern>,
}

impl NameMatchMethodMatcher {
    pub fn new<I, S>(names: I) -> AopResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = names
            .into_iter()
            .map(|name| WildcardPattern::new(name.as_ref()))
            .collect::<AopResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }
}

impl MethodMatcher for NameMatchMethodMatcher {
    fn matches(&self, method: &Method, _target_class: &ClassInfo) -> bool {
        self.patterns.iter().any(|p| p.is_match(method.name()))
    }
}

/// 正则方法匹配器
///
/// 依次对 `声明类型::方法名` 与 `目标类型::方法名` 进行匹配，
/// 命中任一包含模式且未命中排除模式即视为匹配。
#[derive(Debug, Clone)]
pub struct RegexMethodMatcher {
    patterns: Vec<Regex>,
    exclusions: Vec<Regex>,
}

impl RegexMethodMatcher {
    pub fn new<I, S>(patterns: I) -> AopResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            patterns: compile_all(patterns)?,
            exclusions: Vec::new(),
        })
    }

    pub fn excluding<I, S>(mut self, exclusions: I) -> AopResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclusions = compile_all(exclusions)?;
        Ok(self)
    }

    fn matches_signature(&self, signature: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(signature))
            && !self.exclusions.iter().any(|p| p.is_match(signature))
    }
}

fn compile_all<I, S>(patterns: I) -> AopResult<Vec<Regex>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| {
            Regex::new(p.as_ref()).map_err(|e| AopError::InvalidPointcut {
                expression: p.as_ref().to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

impl MethodMatcher for RegexMethodMatcher {
    fn matches(&self, method: &Method, target_class: &ClassInfo) -> bool {
        self.matches_signature(&format!("{}::{}", method.declaring_type(), method.name()))
            || self.matches_signature(&format!(
                "{}::{}",
                target_class.simple_name(),
                method.name()
            ))
    }
}

/// 参数谓词
pub type ArgsPredicate = Arc<dyn Fn(&Method, &ClassInfo, &Arguments) -> bool + Send + Sync>;

/// 运行时方法匹配器
///
/// 静态部分委托给 `inner`，运行时部分在每次调用时以实际参数求值。
#[derive(Clone)]
pub struct RuntimeMethodMatcher {
    inner: Arc<dyn MethodMatcher>,
    predicate: ArgsPredicate,
}

impl RuntimeMethodMatcher {
    pub fn new<F>(inner: Arc<dyn MethodMatcher>, predicate: F) -> Self
    where
        F: Fn(&Method, &ClassInfo, &Arguments) -> bool + Send + Sync + 'static,
    {
        Self {
            inner,
            predicate: Arc::new(predicate),
        }
    }
}

impl MethodMatcher for RuntimeMethodMatcher {
    fn matches(&self, method: &Method, target_class: &ClassInfo) -> bool {
        self.inner.matches(method, target_class)
    }

    fn matches_with_introductions(
        &self,
        method: &Method,
        target_class: &ClassInfo,
        has_introductions: bool,
    ) -> bool {
        self.inner
            .matches_with_introductions(method, target_class, has_introductions)
    }

    fn is_runtime(&self) -> bool {
        true
    }

    fn matches_args(&self, method: &Method, target_class: &ClassInfo, args: &Arguments) -> bool {
        if self.inner.is_runtime() && !self.inner.matches_args(method, target_class, args) {
            return false;
        }
        (self.predicate)(method, target_class, args)
    }
}

/// 类型过滤器的并集
struct UnionClassFilter(Arc<dyn ClassFilter>, Arc<dyn ClassFilter>);

impl ClassFilter for UnionClassFilter {
    fn matches(&self, class: &ClassInfo) -> bool {
        self.0.matches(class) || self.1.matches(class)
    }
}

/// 类型过滤器的交集
struct IntersectionClassFilter(Arc<dyn ClassFilter>, Arc<dyn ClassFilter>);

impl ClassFilter for IntersectionClassFilter {
    fn matches(&self, class: &ClassInfo) -> bool {
        self.0.matches(class) && self.1.matches(class)
    }
}

/// 方法匹配器的交集
struct IntersectionMethodMatcher(Arc<dyn MethodMatcher>, Arc<dyn MethodMatcher>);

impl MethodMatcher for IntersectionMethodMatcher {
    fn matches(&self, method: &Method, target_class: &ClassInfo) -> bool {
        self.0.matches(method, target_class) && self.1.matches(method, target_class)
    }

    fn matches_with_introductions(
        &self,
        method: &Method,
        target_class: &ClassInfo,
        has_introductions: bool,
    ) -> bool {
        self.0
            .matches_with_introductions(method, target_class, has_introductions)
            && self
                .1
                .matches_with_introductions(method, target_class, has_introductions)
    }

    fn is_runtime(&self) -> bool {
        self.0.is_runtime() || self.1.is_runtime()
    }

    fn matches_args(&self, method: &Method, target_class: &ClassInfo, args: &Arguments) -> bool {
        self.0.matches_args(method, target_class, args)
            && self.1.matches_args(method, target_class, args)
    }
}

/// 感知类型过滤器的方法匹配器并集
///
/// 每一侧只在自身的类型过滤器接受目标类型时才参与匹配，
/// 保证 `a.union(b)` 不会把 `a` 的方法匹配应用到只被 `b` 接受的类型上。
struct UnionMethodMatcher {
    left: Pointcut,
    right: Pointcut,
}

impl UnionMethodMatcher {
    fn side_matches(side: &Pointcut, method: &Method, class: &ClassInfo, intro: bool) -> bool {
        side.class_filter.matches(class)
            && side
                .method_matcher
                .matches_with_introductions(method, class, intro)
    }
}

impl MethodMatcher for UnionMethodMatcher {
    fn matches(&self, method: &Method, target_class: &ClassInfo) -> bool {
        self.matches_with_introductions(method, target_class, false)
    }

    fn matches_with_introductions(
        &self,
        method: &Method,
        target_class: &ClassInfo,
        has_introductions: bool,
    ) -> bool {
        Self::side_matches(&self.left, method, target_class, has_introductions)
            || Self::side_matches(&self.right, method, target_class, has_introductions)
    }

    fn is_runtime(&self) -> bool {
        self.left.method_matcher.is_runtime() || self.right.method_matcher.is_runtime()
    }

    fn matches_args(&self, method: &Method, target_class: &ClassInfo, args: &Arguments) -> bool {
        let side = |p: &Pointcut| {
            p.class_filter.matches(target_class)
                && p.method_matcher.matches(method, target_class)
                && p.method_matcher.matches_args(method, target_class, args)
        };
        side(&self.left) || side(&self.right)
    }
}

/// 切点：类型过滤器与方法匹配器的组合
#[derive(Clone)]
pub struct Pointcut {
    class_filter: Arc<dyn ClassFilter>,
    method_matcher: Arc<dyn MethodMatcher>,
}

impl Pointcut {
    pub fn new(class_filter: Arc<dyn ClassFilter>, method_matcher: Arc<dyn MethodMatcher>) -> Self {
        Self {
            class_filter,
            method_matcher,
        }
    }

    /// 匹配所有类型的所有方法
    pub fn all() -> Self {
        Self::new(Arc::new(TrueClassFilter), Arc::new(TrueMethodMatcher))
    }

    /// 所有类型上按方法名匹配，例如 `Pointcut::method_names(["save*"])`
    pub fn method_names<I, S>(names: I) -> AopResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self::new(
            Arc::new(TrueClassFilter),
            Arc::new(NameMatchMethodMatcher::new(names)?),
        ))
    }

    /// 可以赋值给指定类型的类的所有方法
    pub fn for_type(type_name: impl Into<String>) -> Self {
        Self::new(
            Arc::new(AssignableClassFilter::new(type_name)),
            Arc::new(TrueMethodMatcher),
        )
    }

    /// 解析切点表达式，例如 `execution(* *Repo.save*(..)) && !within(Legacy*)`
    pub fn expression(expression: &str) -> AopResult<Self> {
        Ok(Self::from(crate::expression::PointcutExpression::parse(
            expression,
        )?))
    }

    pub fn class_filter(&self) -> &Arc<dyn ClassFilter> {
        &self.class_filter
    }

    pub fn method_matcher(&self) -> &Arc<dyn MethodMatcher> {
        &self.method_matcher
    }

    pub fn with_class_filter(mut self, class_filter: Arc<dyn ClassFilter>) -> Self {
        self.class_filter = class_filter;
        self
    }

    pub fn with_method_matcher(mut self, method_matcher: Arc<dyn MethodMatcher>) -> Self {
        self.method_matcher = method_matcher;
        self
    }

    /// 并集：任一切点匹配即匹配
    pub fn union(self, other: Pointcut) -> Self {
        let class_filter = Arc::new(UnionClassFilter(
            Arc::clone(&self.class_filter),
            Arc::clone(&other.class_filter),
        ));
        let method_matcher = Arc::new(UnionMethodMatcher {
            left: self,
            right: other,
        });
        Self::new(class_filter, method_matcher)
    }

    /// 交集：两个切点都匹配才匹配
    pub fn intersection(self, other: Pointcut) -> Self {
        Self::new(
            Arc::new(IntersectionClassFilter(self.class_filter, other.class_filter)),
            Arc::new(IntersectionMethodMatcher(
                self.method_matcher,
                other.method_matcher,
            )),
        )
    }

    /// 静态判断该切点是否可能应用于方法（不考虑运行时参数）
    pub fn matches(&self, method: &Method, target_class: &ClassInfo) -> bool {
        self.class_filter.matches(target_class) && self.method_matcher.matches(method, target_class)
    }
}

impl fmt::Debug for Pointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pointcut")
            .field("runtime", &self.method_matcher.is_runtime())
            .finish_non_exhaustive()
    }
}
