//! ServiceAccount for the instance workload

use k8s_openapi::api::core::v1::ServiceAccount;

use super::object_meta;

/// Desired ServiceAccount, named after the instance
pub fn service_account(namespace: &str, instance: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(namespace, instance, instance),
        ..ServiceAccount::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::LABEL_INSTANCE;

    #[test]
    fn named_after_the_instance() {
        let sa = service_account("monitoring", "main");
        assert_eq!(sa.metadata.name.as_deref(), Some("main"));
        assert_eq!(sa.metadata.namespace.as_deref(), Some("monitoring"));
        assert_eq!(sa.metadata.labels.unwrap()[LABEL_INSTANCE], "main");
    }
}
