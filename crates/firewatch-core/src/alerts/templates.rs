// Alert template catalog: named rule sets an operator applies to a device
// in one step.

use crate::model::{CompareOp, Severity};

/// One rule inside a template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateRule {
    pub metric_type: &'static str,
    pub threshold: f64,
    pub operator: CompareOp,
    pub severity: Severity,
}

/// A named, pre-configured set of alert rules.
#[derive(Debug, Clone)]
pub struct AlertTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub rules: &'static [TemplateRule],
}

const CRITICAL_SYSTEM_HEALTH: &[TemplateRule] = &[
    TemplateRule {
        metric_type: "cpu",
        threshold: 90.0,
        operator: CompareOp::Gt,
        severity: Severity::Critical,
    },
    TemplateRule {
        metric_type: "memory",
        threshold: 85.0,
        operator: CompareOp::Gt,
        severity: Severity::Critical,
    },
    TemplateRule {
        metric_type: "interface_errors",
        threshold: 100.0,
        operator: CompareOp::Gt,
        severity: Severity::Warning,
    },
];

const SECURITY_MONITORING: &[TemplateRule] = &[
    TemplateRule {
        metric_type: "threats_critical",
        threshold: 0.0,
        operator: CompareOp::Gt,
        severity: Severity::Critical,
    },
    TemplateRule {
        metric_type: "per_ip_bandwidth_5min",
        threshold: 1000.0,
        operator: CompareOp::Gt,
        severity: Severity::Warning,
    },
];

const COMPREHENSIVE_MONITORING: &[TemplateRule] = &[
    TemplateRule {
        metric_type: "cpu",
        threshold: 90.0,
        operator: CompareOp::Gt,
        severity: Severity::Critical,
    },
    TemplateRule {
        metric_type: "memory",
        threshold: 85.0,
        operator: CompareOp::Gt,
        severity: Severity::Critical,
    },
    TemplateRule {
        metric_type: "sessions",
        threshold: 200_000.0,
        operator: CompareOp::Gt,
        severity: Severity::Warning,
    },
    TemplateRule {
        metric_type: "threats_critical",
        threshold: 0.0,
        operator: CompareOp::Gt,
        severity: Severity::Critical,
    },
    TemplateRule {
        metric_type: "interface_errors",
        threshold: 100.0,
        operator: CompareOp::Gt,
        severity: Severity::Warning,
    },
    TemplateRule {
        metric_type: "throughput_total",
        threshold: 900.0,
        operator: CompareOp::Gt,
        severity: Severity::Info,
    },
];

const TEMPLATES: &[AlertTemplate] = &[
    AlertTemplate {
        id: "critical_system_health",
        name: "Critical System Health",
        description: "CPU, memory, and interface health thresholds for production firewalls",
        category: "system",
        rules: CRITICAL_SYSTEM_HEALTH,
    },
    AlertTemplate {
        id: "security_monitoring",
        name: "Security Monitoring",
        description: "Critical threat activity and per-client bandwidth abuse",
        category: "security",
        rules: SECURITY_MONITORING,
    },
    AlertTemplate {
        id: "comprehensive_monitoring",
        name: "Comprehensive Monitoring",
        description: "Full coverage of system health, security, and capacity",
        category: "general",
        rules: COMPREHENSIVE_MONITORING,
    },
];

/// The full template catalog.
pub fn catalog() -> &'static [AlertTemplate] {
    TEMPLATES
}

/// Look up a template by id.
pub fn by_id(id: &str) -> Option<&'static AlertTemplate> {
    TEMPLATES.iter().find(|t| t.id == id)
}

/// Templates in a category.
pub fn by_category(category: &str) -> Vec<&'static AlertTemplate> {
    TEMPLATES.iter().filter(|t| t.category == category).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_all_templates() {
        let ids: Vec<_> = catalog().iter().map(|t| t.id).collect();
        assert_eq!(
            ids,
            vec![
                "critical_system_health",
                "security_monitoring",
                "comprehensive_monitoring"
            ]
        );
    }

    #[test]
    fn lookup_by_id() {
        assert!(by_id("security_monitoring").is_some());
        assert!(by_id("nonexistent").is_none());
    }

    #[test]
    fn rules_are_nonempty_and_valid() {
        for template in catalog() {
            assert!(!template.rules.is_empty(), "{} has no rules", template.id);
        }
    }
}
