use std::fmt;
use std::hash::{Hash, Hasher};

/// Method part of a method breakpoint: `name#descriptor` or `name(args)ret`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSelector {
    raw: String,
    name: String,
    signature: Option<String>,
}

impl MethodSelector {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (name, signature) = if let Some((name, signature)) = raw.split_once('#') {
            (name, Some(signature))
        } else if let Some(paren) = raw.find('(') {
            (&raw[..paren], Some(&raw[paren..]))
        } else {
            (raw, None)
        };
        Self {
            raw: raw.to_owned(),
            name: name.trim().to_owned(),
            signature: signature
                .map(str::trim)
                .filter(|sig| !sig.is_empty())
                .map(str::to_owned),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` matches any overload.
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, name: &str, signature: &str, generic_signature: Option<&str>) -> bool {
        if self.name != name {
            return false;
        }
        match self.signature.as_deref() {
            None => true,
            Some(wanted) => wanted == signature || generic_signature == Some(wanted),
        }
    }
}

/// What a watch request stops on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Line,
    Method,
    Lambda,
}

/// A user breakpoint.
///
/// Identity is `(class name, line, method selector)`; hit count, condition,
/// log message and the enabled flag are attributes and do not take part in
/// equality or hashing.
#[derive(Debug, Clone)]
pub struct BreakpointSpec {
    class_name: String,
    line: i32,
    method: Option<MethodSelector>,
    pub hit_count: u32,
    pub condition: Option<String>,
    pub log_message: Option<String>,
    pub enabled: bool,
    /// Resolve already-loaded classes on a background task. `None` follows
    /// the session's dispatch mode.
    pub async_resolution: Option<bool>,
}

impl BreakpointSpec {
    /// `class_name` may carry a method selector after `#`
    /// (`com.example.Foo#bar(I)V`), which makes this a method breakpoint.
    pub fn new(class_name: &str, line: i32) -> Self {
        let (class_name, method) = match class_name.split_once('#') {
            Some((class_name, selector)) => (class_name, Some(MethodSelector::parse(selector))),
            None => (class_name, None),
        };
        Self {
            class_name: class_name.trim().to_owned(),
            line,
            method,
            hit_count: 0,
            condition: None,
            log_message: None,
            enabled: true,
            async_resolution: None,
        }
    }

    pub fn line(class_name: &str, line: i32) -> Self {
        Self::new(class_name, line)
    }

    pub fn method(class_name: &str, selector: &str) -> Self {
        let mut spec = Self::new(class_name, 0);
        spec.method = Some(MethodSelector::parse(selector));
        spec
    }

    pub fn with_hit_count(mut self, hit_count: u32) -> Self {
        self.hit_count = hit_count;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_log_message(mut self, message: impl Into<String>) -> Self {
        self.log_message = Some(message.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_async(mut self, async_resolution: bool) -> Self {
        self.async_resolution = Some(async_resolution);
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn line_number(&self) -> i32 {
        self.line
    }

    pub fn method_selector(&self) -> Option<&MethodSelector> {
        self.method.as_ref()
    }

    /// Class-prepare patterns covering the type and everything nested in it.
    pub fn class_prepare_patterns(&self) -> [String; 2] {
        [self.class_name.clone(), format!("{}$*", self.class_name)]
    }

    pub fn watch_kind(&self) -> WatchKind {
        match &self.method {
            None => WatchKind::Line,
            Some(selector) if selector.name().starts_with("lambda$") => WatchKind::Lambda,
            Some(_) => WatchKind::Method,
        }
    }

    fn identity(&self) -> (&str, i32, Option<&str>) {
        (
            &self.class_name,
            self.line,
            self.method.as_ref().map(MethodSelector::as_str),
        )
    }
}

impl PartialEq for BreakpointSpec {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for BreakpointSpec {}

impl Hash for BreakpointSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for BreakpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(selector) => write!(f, "{}#{}", self.class_name, selector.as_str()),
            None => write!(f, "{}:{}", self.class_name, self.line),
        }
    }
}
