use std::collections::BTreeMap;
use std::fmt;
use tracing::{Level, debug, error, info, trace, warn};

/// Fields attached to every message of a logger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    /// e.g. "polling", "writer", "coordinator"
    pub component: String,
    pub site_id: Option<String>,
    pub extra_fields: BTreeMap<String, String>,
}

impl LogContext {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            site_id: None,
            extra_fields: BTreeMap::new(),
        }
    }

    pub fn with_site_id(mut self, site_id: &str) -> Self {
        self.site_id = Some(site_id.to_string());
        self
    }

    pub fn with_field(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.extra_fields.insert(key.to_string(), value.to_string());
        self
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component={}", self.component)?;
        if let Some(site) = &self.site_id {
            write!(f, ",site={}", site)?;
        }
        for (key, value) in &self.extra_fields {
            write!(f, ",{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Component-scoped logger; the context is rendered once at creation
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context: LogContext,
    fields: String,
}

impl StructuredLogger {
    pub fn new(context: LogContext) -> Self {
        let fields = context.to_string();
        Self { context, fields }
    }

    pub fn context(&self) -> &LogContext {
        &self.context
    }

    /// Same component, scoped to one site
    pub fn for_site(&self, site_id: &str) -> Self {
        Self::new(self.context.clone().with_site_id(site_id))
    }

    /// Same context plus one field
    pub fn with_field(&self, key: &str, value: impl fmt::Display) -> Self {
        Self::new(self.context.clone().with_field(key, value))
    }

    pub fn log(&self, level: Level, message: &str) {
        let fields = self.fields.as_str();
        match level {
            Level::ERROR => error!(fields, "{}", message),
            Level::WARN => warn!(fields, "{}", message),
            Level::INFO => info!(fields, "{}", message),
            Level::DEBUG => debug!(fields, "{}", message),
            Level::TRACE => trace!(fields, "{}", message),
        }
    }

    pub fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }

    pub fn trace(&self, message: &str) {
        self.log(Level::TRACE, message);
    }
}

pub fn get_logger(component: &str) -> StructuredLogger {
    StructuredLogger::new(LogContext::new(component))
}

pub fn get_logger_with_context(context: LogContext) -> StructuredLogger {
    StructuredLogger::new(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_rendering() {
        let context = LogContext::new("writer")
            .with_site_id("a")
            .with_field("register", 102);
        assert_eq!(context.to_string(), "component=writer,site=a,register=102");
        assert_eq!(LogContext::new("polling").to_string(), "component=polling");
    }

    #[test]
    fn test_derived_loggers_keep_component() {
        let logger = get_logger("detect").for_site("lambda");
        assert_eq!(logger.context().site_id.as_deref(), Some("lambda"));
        let scoped = logger.with_field("hp", "hp1");
        assert_eq!(scoped.context().component, "detect");
        assert_eq!(
            scoped.context().extra_fields.get("hp").map(String::as_str),
            Some("hp1")
        );
        // Logging without a subscriber is a no-op
        scoped.info("probe");
    }
}
