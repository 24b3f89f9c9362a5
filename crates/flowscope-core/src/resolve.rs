use crate::models::{Endpoint, LabelDirectory, LABEL_APP, LABEL_ENV, LABEL_LOC, LABEL_ROLE};

pub const GROUP_DELIMITER: &str = "|";

/// Maps a flow endpoint to the group identity it is reported under.
pub trait GroupResolver {
    fn resolve(&self, endpoint: &Endpoint) -> String;
}

/// Resolves endpoints through workload labels, falling back to the raw IP
/// when the endpoint has no workload.
///
/// A labeled workload resolves to `role|app|env` (or `role|app|env|loc`),
/// with empty strings for missing dimensions, so even a workload without any
/// labels (`||`) stays distinct from an IP identity.
pub struct LabelResolver<'a> {
    labels: &'a LabelDirectory,
    include_location: bool,
}

impl<'a> LabelResolver<'a> {
    pub fn new(labels: &'a LabelDirectory, include_location: bool) -> Self {
        Self { labels, include_location }
    }
}

impl GroupResolver for LabelResolver<'_> {
    fn resolve(&self, endpoint: &Endpoint) -> String {
        let Some(workload) = endpoint.workload.as_ref() else {
            return endpoint.ip.clone();
        };

        let dims: &[&str] = if self.include_location {
            &[LABEL_ROLE, LABEL_APP, LABEL_ENV, LABEL_LOC]
        } else {
            &[LABEL_ROLE, LABEL_APP, LABEL_ENV]
        };

        dims.iter()
            .map(|key| {
                self.labels
                    .workload_label(workload, key)
                    .map(|l| l.value.as_str())
                    .unwrap_or("")
            })
            .collect::<Vec<_>>()
            .join(GROUP_DELIMITER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Label, WorkloadRef};

    fn labels() -> LabelDirectory {
        LabelDirectory::new([
            Label { href: "/l/role-web".into(), key: "role".into(), value: "web".into() },
            Label { href: "/l/app-crm".into(), key: "app".into(), value: "crm".into() },
            Label { href: "/l/env-prod".into(), key: "env".into(), value: "prod".into() },
            Label { href: "/l/loc-dc1".into(), key: "loc".into(), value: "dc1".into() },
        ])
    }

    fn workload(hrefs: &[&str]) -> WorkloadRef {
        WorkloadRef {
            href: "/workloads/1".into(),
            hostname: "crm-web-01".into(),
            labels: hrefs.iter().map(|h| h.to_string()).collect(),
        }
    }

    #[test]
    fn test_ip_fallback_is_verbatim() {
        let dir = labels();
        let resolver = LabelResolver::new(&dir, false);
        assert_eq!(resolver.resolve(&Endpoint::ip("192.168.4.20")), "192.168.4.20");
    }

    #[test]
    fn test_full_label_identity() {
        let dir = labels();
        let ep = Endpoint::workload(
            "10.1.1.1",
            workload(&["/l/role-web", "/l/app-crm", "/l/env-prod", "/l/loc-dc1"]),
        );
        assert_eq!(LabelResolver::new(&dir, false).resolve(&ep), "web|crm|prod");
        assert_eq!(LabelResolver::new(&dir, true).resolve(&ep), "web|crm|prod|dc1");
    }

    #[test]
    fn test_missing_dimensions_are_empty() {
        let dir = labels();
        let ep = Endpoint::workload("10.1.1.1", workload(&["/l/app-crm", "/l/unknown"]));
        assert_eq!(LabelResolver::new(&dir, false).resolve(&ep), "|crm|");
    }

    #[test]
    fn test_unlabeled_workload_differs_from_ip() {
        let dir = labels();
        let resolver = LabelResolver::new(&dir, false);
        let ep = Endpoint::workload("10.1.1.1", workload(&[]));
        let identity = resolver.resolve(&ep);
        assert_eq!(identity, "||");
        assert_ne!(identity, resolver.resolve(&Endpoint::ip("10.1.1.1")));
    }
}
