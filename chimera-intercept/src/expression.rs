//! 切点表达式
//!
//! 支持的语法：
//!
//! ```text
//! execution(<返回类型> <类型>.<方法>(<参数>))   例如 execution(* *Repo.save*(..))
//! within(<类型模式>)                              目标类型名匹配
//! target(<类型名>)                                目标类型可赋值给该类型
//! method(<方法名模式>)
//! expr && expr | expr || expr | !expr | (expr)
//! ```
//!
//! 类型模式后缀 `+` 表示包含子类型，例如 `execution(* Repo+.*(..))`。
//! 参数部分 `(..)` 匹配任意参数，`()` 匹配无参方法，其余按逗号分隔逐个匹配类型名。

use crate::error::{AopError, AopResult};
use crate::joinpoint::{Arguments, ClassInfo, Method};
use crate::pointcut::{ClassFilter, MethodMatcher, Pointcut, WildcardPattern};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// 参数列表模式
#[derive(Debug, Clone)]
pub enum ParameterPattern {
    /// `(..)`
    Any,
    /// `()` 或 `(A, B*)`
    Exact(Vec<WildcardPattern>),
}

impl ParameterPattern {
    fn matches(&self, method: &Method) -> bool {
        match self {
            ParameterPattern::Any => true,
            ParameterPattern::Exact(patterns) => {
                patterns.len() == method.parameter_count()
                    && patterns
                        .iter()
                        .zip(method.parameter_types())
                        .all(|(p, ty)| p.matches_type(ty))
            }
        }
    }
}

/// `execution(...)` 的解析结果
#[derive(Debug, Clone)]
pub struct ExecutionPattern {
    return_type: WildcardPattern,
    declaring_type: WildcardPattern,
    include_subtypes: bool,
    method: WildcardPattern,
    parameters: ParameterPattern,
}

impl ExecutionPattern {
    /// 解析 `* UserService.get_user(..)` 形式的执行表达式
    pub fn parse(expression: &str) -> AopResult<Self> {
        let invalid = |reason: &str| AopError::InvalidPointcut {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let body = expression.trim();
        if !body.ends_with(')') {
            return Err(invalid("expected '<return> <type>.<method>(<params>)'"));
        }
        let open = body
            .rfind('(')
            .ok_or_else(|| invalid("missing parameter list"))?;
        let params = &body[open + 1..body.len() - 1];
        let (return_part, name_part) = body[..open]
            .trim_end()
            .rsplit_once(char::is_whitespace)
            .ok_or_else(|| invalid("expected '<return> <type>.<method>(<params>)'"))?;

        let (type_part, method_part) = name_part.rsplit_once('.').unwrap_or(("*", name_part));
        let (type_part, include_subtypes) = match type_part.strip_suffix('+') {
            Some(stripped) => (stripped, true),
            None => (type_part, false),
        };

        let parameters = match params.trim() {
            ".." => ParameterPattern::Any,
            "" => ParameterPattern::Exact(Vec::new()),
            list => ParameterPattern::Exact(
                list.split(',')
                    .map(WildcardPattern::new)
                    .collect::<AopResult<Vec<_>>>()?,
            ),
        };

        Ok(Self {
            return_type: WildcardPattern::new(return_part)?,
            declaring_type: WildcardPattern::new(type_part)?,
            include_subtypes,
            method: WildcardPattern::new(method_part)?,
            parameters,
        })
    }

    fn type_matches(&self, class: &ClassInfo) -> bool {
        if self.include_subtypes {
            class.is_assignable_to(self.declaring_type.as_str())
        } else {
            class
                .hierarchy_names()
                .iter()
                .any(|name| self.declaring_type.matches_type(name))
        }
    }

    fn only_type_constrained(&self) -> bool {
        self.method.as_str() == "*"
            && self.return_type.as_str() == "*"
            && matches!(self.parameters, ParameterPattern::Any)
    }

    fn matches(&self, method: &Method, class: &ClassInfo) -> bool {
        self.type_matches(class)
            && self.method.is_match(method.name())
            && self.return_type.matches_type(method.return_type())
            && self.parameters.matches(method)
    }
}

/// 静态方法谓词
pub type MethodPredicate = Arc<dyn Fn(&Method, &ClassInfo) -> bool + Send + Sync>;

/// 参数谓词
pub type ArgumentPredicate = Arc<dyn Fn(&Arguments) -> bool + Send + Sync>;

/// 切点表达式
///
/// 同时实现 [`ClassFilter`] 与 [`MethodMatcher`]。包含 [`PointcutExpression::Args`]
/// 的表达式是运行时匹配器。
#[derive(Clone)]
pub enum PointcutExpression {
    /// 匹配所有方法
    All,

    /// 目标类型名匹配，例如 `within(*Repo)`
    TypePattern(WildcardPattern),

    /// 目标类型可赋值给指定类型，例如 `target(Repo)`
    Target(String),

    /// 方法名匹配，例如 `method(save*)`
    MethodPattern(WildcardPattern),

    /// 完整的执行表达式
    Execution(ExecutionPattern),

    /// 使用正则表达式匹配目标类型名
    TypeRegex(Regex),

    /// 使用正则表达式匹配方法名
    MethodRegex(Regex),

    /// 自定义静态匹配函数
    Custom(MethodPredicate),

    /// 按实际参数匹配（运行时）
    Args(ArgumentPredicate),

    /// 与运算（AND）
    And(Box<PointcutExpression>, Box<PointcutExpression>),

    /// 或运算（OR）
    Or(Box<PointcutExpression>, Box<PointcutExpression>),

    /// 非运算（NOT）
    Not(Box<PointcutExpression>),
}

fn and3(left: Option<bool>, right: impl FnOnce() -> Option<bool>) -> Option<bool> {
    match left {
        Some(false) => Some(false),
        Some(true) => right(),
        None => match right() {
            Some(false) => Some(false),
            _ => None,
        },
    }
}

fn or3(left: Option<bool>, right: impl FnOnce() -> Option<bool>) -> Option<bool> {
    match left {
        Some(true) => Some(true),
        Some(false) => right(),
        None => match right() {
            Some(true) => Some(true),
            _ => None,
        },
    }
}

impl PointcutExpression {
    /// 解析完整的切点表达式
    pub fn parse(expression: &str) -> AopResult<Self> {
        let mut parser = Parser::new(expression);
        let expr = parser.parse_or()?;
        parser.skip_ws();
        if !parser.rest.is_empty() {
            return Err(parser.error(format!("unexpected trailing input '{}'", parser.rest)));
        }
        Ok(expr)
    }

    /// 创建 execution 表达式
    ///
    /// 例如：execution("* UserService.get_user(..)")
    pub fn execution(expression: &str) -> AopResult<Self> {
        Ok(PointcutExpression::Execution(ExecutionPattern::parse(
            expression,
        )?))
    }

    pub fn within(pattern: &str) -> AopResult<Self> {
        Ok(PointcutExpression::TypePattern(WildcardPattern::new(pattern)?))
    }

    pub fn method(pattern: &str) -> AopResult<Self> {
        Ok(PointcutExpression::MethodPattern(WildcardPattern::new(
            pattern,
        )?))
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Method, &ClassInfo) -> bool + Send + Sync + 'static,
    {
        PointcutExpression::Custom(Arc::new(predicate))
    }

    pub fn args<F>(predicate: F) -> Self
    where
        F: Fn(&Arguments) -> bool + Send + Sync + 'static,
    {
        PointcutExpression::Args(Arc::new(predicate))
    }

    /// 与运算
    pub fn and(self, other: PointcutExpression) -> Self {
        PointcutExpression::And(Box::new(self), Box::new(other))
    }

    /// 或运算
    pub fn or(self, other: PointcutExpression) -> Self {
        PointcutExpression::Or(Box::new(self), Box::new(other))
    }

    /// 非运算
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        PointcutExpression::Not(Box::new(self))
    }

    /// 是否包含运行时（参数）条件
    pub fn is_runtime(&self) -> bool {
        match self {
            PointcutExpression::Args(_) => true,
            PointcutExpression::And(l, r) | PointcutExpression::Or(l, r) => {
                l.is_runtime() || r.is_runtime()
            }
            PointcutExpression::Not(e) => e.is_runtime(),
            _ => false,
        }
    }

    /// 仅凭类型能否确定匹配结果；`None` 表示还取决于方法或参数
    pub fn class_match(&self, class: &ClassInfo) -> Option<bool> {
        match self {
            PointcutExpression::All => Some(true),
            PointcutExpression::TypePattern(p) => Some(p.matches_type(class.name())),
            PointcutExpression::Target(name) => Some(class.is_assignable_to(name)),
            PointcutExpression::TypeRegex(r) => Some(r.is_match(class.name())),
            PointcutExpression::Execution(e) => {
                if !e.type_matches(class) {
                    Some(false)
                } else if e.only_type_constrained() {
                    Some(true)
                } else {
                    None
                }
            }
            PointcutExpression::MethodPattern(_)
            | PointcutExpression::MethodRegex(_)
            | PointcutExpression::Custom(_)
            | PointcutExpression::Args(_) => None,
            PointcutExpression::And(l, r) => and3(l.class_match(class), || r.class_match(class)),
            PointcutExpression::Or(l, r) => or3(l.class_match(class), || r.class_match(class)),
            PointcutExpression::Not(e) => e.class_match(class).map(|b| !b),
        }
    }

    /// 不考虑参数的匹配结果；`None` 表示取决于运行时参数
    pub fn static_match(&self, method: &Method, class: &ClassInfo) -> Option<bool> {
        match self {
            PointcutExpression::MethodPattern(p) => Some(p.is_match(method.name())),
            PointcutExpression::MethodRegex(r) => Some(r.is_match(method.name())),
            PointcutExpression::Execution(e) => Some(e.matches(method, class)),
            PointcutExpression::Custom(f) => Some(f(method, class)),
            PointcutExpression::Args(_) => None,
            PointcutExpression::And(l, r) => and3(l.static_match(method, class), || {
                r.static_match(method, class)
            }),
            PointcutExpression::Or(l, r) => or3(l.static_match(method, class), || {
                r.static_match(method, class)
            }),
            PointcutExpression::Not(e) => e.static_match(method, class).map(|b| !b),
            other => other.class_match(class),
        }
    }

    /// 以实际参数完整求值
    pub fn evaluate(&self, method: &Method, class: &ClassInfo, args: &Arguments) -> bool {
        match self {
            PointcutExpression::Args(f) => f(args),
            PointcutExpression::And(l, r) => {
                l.evaluate(method, class, args) && r.evaluate(method, class, args)
            }
            PointcutExpression::Or(l, r) => {
                l.evaluate(method, class, args) || r.evaluate(method, class, args)
            }
            PointcutExpression::Not(e) => !e.evaluate(method, class, args),
            other => other.static_match(method, class).unwrap_or(true),
        }
    }
}

impl ClassFilter for PointcutExpression {
    fn matches(&self, class: &ClassInfo) -> bool {
        self.class_match(class) != Some(false)
    }
}

impl MethodMatcher for PointcutExpression {
    fn matches(&self, method: &Method, target_class: &ClassInfo) -> bool {
        self.static_match(method, target_class) != Some(false)
    }

    fn is_runtime(&self) -> bool {
        PointcutExpression::is_runtime(self)
    }

    fn matches_args(&self, method: &Method, target_class: &ClassInfo, args: &Arguments) -> bool {
        self.evaluate(method, target_class, args)
    }
}

impl From<PointcutExpression> for Pointcut {
    fn from(expression: PointcutExpression) -> Self {
        let expression = Arc::new(expression);
        Pointcut::new(expression.clone(), expression)
    }
}

impl fmt::Debug for PointcutExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointcutExpression::All => write!(f, "All"),
            PointcutExpression::TypePattern(p) => write!(f, "TypePattern({})", p.as_str()),
            PointcutExpression::Target(t) => write!(f, "Target({})", t),
            PointcutExpression::MethodPattern(p) => write!(f, "MethodPattern({})", p.as_str()),
            PointcutExpression::Execution(e) => write!(
                f,
                "Execution({}{}.{})",
                e.declaring_type.as_str(),
                if e.include_subtypes { "+" } else { "" },
                e.method.as_str()
            ),
            PointcutExpression::TypeRegex(r) => write!(f, "TypeRegex({})", r.as_str()),
            PointcutExpression::MethodRegex(r) => write!(f, "MethodRegex({})", r.as_str()),
            PointcutExpression::Custom(_) => write!(f, "Custom(...)"),
            PointcutExpression::Args(_) => write!(f, "Args(...)"),
            PointcutExpression::And(l, r) => write!(f, "And({:?}, {:?})", l, r),
            PointcutExpression::Or(l, r) => write!(f, "Or({:?}, {:?})", l, r),
            PointcutExpression::Not(e) => write!(f, "Not({:?})", e),
        }
    }
}

/// 递归下降解析器
struct Parser<'a> {
    source: &'a str,
    rest: &'a str,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            rest: source,
        }
    }

    fn error(&self, reason: impl Into<String>) -> AopError {
        AopError::InvalidPointcut {
            expression: self.source.to_string(),
            reason: reason.into(),
        }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        match self.rest.strip_prefix(token) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn parse_or(&mut self) -> AopResult<PointcutExpression> {
        let mut left = self.parse_and()?;
        while self.eat("||") {
            left = left.or(self.parse_and()?);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> AopResult<PointcutExpression> {
        let mut left = self.parse_unary()?;
        while self.eat("&&") {
            left = left.and(self.parse_unary()?);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> AopResult<PointcutExpression> {
        if self.eat("!") {
            return Ok(self.parse_unary()?.not());
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> AopResult<PointcutExpression> {
        if self.eat("(") {
            let expr = self.parse_or()?;
            if !self.eat(")") {
                return Err(self.error("expected ')'"));
            }
            return Ok(expr);
        }

        self.skip_ws();
        let end = self
            .rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(self.rest.len());
        let designator = &self.rest[..end];
        if designator.is_empty() {
            return Err(self.error("expected a pointcut designator"));
        }
        self.rest = &self.rest[end..];
        if !self.eat("(") {
            return Err(self.error(format!("expected '(' after '{}'", designator)));
        }
        let body = self.balanced_body()?;

        match designator {
            "execution" => PointcutExpression::execution(body),
            "within" => PointcutExpression::within(body),
            "target" => Ok(PointcutExpression::Target(body.trim().to_string())),
            "method" => PointcutExpression::method(body),
            other => Err(self.error(format!("unsupported designator '{}'", other))),
        }
    }

    fn balanced_body(&mut self) -> AopResult<&'a str> {
        let mut depth = 1usize;
        for (i, c) in self.rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        let body = &self.rest[..i];
                        self.rest = &self.rest[i + 1..];
                        return Ok(body);
                    }
                }
                _ => {}
            }
        }
        Err(self.error("unbalanced parentheses"))
    }
}
