use crate::core::{EnvironmentUpdater, InboundEvent};
use figment::providers::Env;
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const UPDATE_CONFIG_NAME: &str = "configs/lambda/al-cwe-collector.json";
pub const APPLICATION_ID: &str = "guardduty";
pub const SKIP_REGISTRATION_COLLECTOR_ID: &str = "NA";

const ENV_KEYS: [&str; 10] = [
    "aims_access_key_id",
    "aims_secret_key",
    "aws_lambda_update_config_name",
    "stack_name",
    "al_application_id",
    "azcollect_api",
    "azollect_api",
    "collector_id",
    "ingest_api",
    "aws_lambda_function_name",
];

/// The collector's view of its Lambda environment. Loaded once at start up and updated in
/// memory by the bootstrap and legacy repair steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorEnvironment {
    pub aims_access_key_id: String,
    pub aims_secret_key: String,
    pub aws_lambda_update_config_name: Option<String>,
    pub stack_name: Option<String>,
    pub al_application_id: Option<String>,
    pub azcollect_api: Option<String>,
    /// Misspelled endpoint key written by old deployments.
    pub azollect_api: Option<String>,
    pub collector_id: Option<String>,
    pub ingest_api: Option<String>,
    pub aws_lambda_function_name: Option<String>,
}

impl CollectorEnvironment {
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new().merge(Env::raw().only(&ENV_KEYS)).extract()
    }

    pub fn skips_registration(&self) -> bool {
        self.collector_id.as_deref() == Some(SKIP_REGISTRATION_COLLECTOR_ID)
    }

    /// Restores `azcollect_api` from the misspelled `azollect_api` when only the latter is set.
    /// Returns true when the repair was applied.
    pub fn repair_legacy_api_alias(&mut self) -> bool {
        if self.azcollect_api.is_some() {
            return false;
        }
        let Some(legacy_api) = self.azollect_api.clone() else {
            return false;
        };
        self.collector_id = Some(SKIP_REGISTRATION_COLLECTOR_ID.to_string());
        self.azcollect_api = Some(legacy_api);
        true
    }
}

impl std::fmt::Display for CollectorEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CollectorEnvironment {{ stack_name: {:?}, al_application_id: {:?}, collector_id: {:?} }}",
            self.stack_name, self.al_application_id, self.collector_id
        )
    }
}

/// Fills in environment variables older deployments were created without. Failures are
/// logged and never stop the invocation.
pub async fn bootstrap_environment<U: EnvironmentUpdater>(
    environment: &mut CollectorEnvironment,
    updater: &U,
    event: &InboundEvent,
) {
    if environment.aws_lambda_update_config_name.is_none() {
        environment.aws_lambda_update_config_name = Some(UPDATE_CONFIG_NAME.to_string());
        let vars = HashMap::from([(
            "aws_lambda_update_config_name".to_string(),
            UPDATE_CONFIG_NAME.to_string(),
        )]);
        if let Err(e) = updater.set_env(vars).await {
            tracing::error!(
                "Error while adding aws_lambda_update_config_name in environment variable: {}",
                e
            );
        }
    }

    let missing_stack_name = environment.stack_name.is_none() && event.stack_name.is_some();
    if missing_stack_name || environment.al_application_id.is_none() {
        let mut vars = HashMap::from([(
            "al_application_id".to_string(),
            APPLICATION_ID.to_string(),
        )]);
        if let Some(stack_name) = &event.stack_name {
            vars.insert("stack_name".to_string(), stack_name.clone());
        }
        if let Err(e) = updater.set_env(vars).await {
            tracing::error!("Error while adding stack_name in environment variable: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{bootstrap_environment, CollectorEnvironment, UPDATE_CONFIG_NAME};
    use crate::core::{InboundEvent, MockEnvironmentUpdater};
    use std::collections::HashMap;

    fn bootstrapped_environment() -> CollectorEnvironment {
        CollectorEnvironment {
            aims_access_key_id: "key-id".to_string(),
            aims_secret_key: "c2VjcmV0".to_string(),
            aws_lambda_update_config_name: Some(UPDATE_CONFIG_NAME.to_string()),
            stack_name: Some("guardduty-stack".to_string()),
            al_application_id: Some("guardduty".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn when_valid_environment_should_load() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("aims_access_key_id", "my-access-key");
            jail.set_env("aims_secret_key", "c2VjcmV0");
            jail.set_env("azcollect_api", "api.example.com");
            jail.set_env("unrelated_variable", "ignored");

            let environment = CollectorEnvironment::load().unwrap();

            assert_eq!(environment.aims_access_key_id, "my-access-key");
            assert_eq!(environment.aims_secret_key, "c2VjcmV0");
            assert_eq!(environment.azcollect_api.as_deref(), Some("api.example.com"));
            assert!(environment.stack_name.is_none());

            Ok(())
        });
    }

    #[test]
    fn when_credentials_are_missing_should_fail_to_load() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("stack_name", "guardduty-stack");

            assert!(CollectorEnvironment::load().is_err());

            Ok(())
        });
    }

    #[test]
    fn when_only_legacy_api_is_set_should_copy_it_and_skip_registration() {
        let mut environment = CollectorEnvironment {
            azollect_api: Some("api.legacy.example.com".to_string()),
            ..Default::default()
        };

        assert!(environment.repair_legacy_api_alias());
        assert_eq!(environment.azcollect_api.as_deref(), Some("api.legacy.example.com"));
        assert!(environment.skips_registration());
    }

    #[test]
    fn when_corrected_api_is_set_should_leave_environment_alone() {
        let mut environment = CollectorEnvironment {
            azollect_api: Some("api.legacy.example.com".to_string()),
            azcollect_api: Some("api.example.com".to_string()),
            collector_id: Some("collector-1".to_string()),
            ..Default::default()
        };

        assert!(!environment.repair_legacy_api_alias());
        assert_eq!(environment.azcollect_api.as_deref(), Some("api.example.com"));
        assert!(!environment.skips_registration());
    }

    #[test]
    fn when_no_api_is_set_should_not_repair() {
        let mut environment = CollectorEnvironment::default();

        assert!(!environment.repair_legacy_api_alias());
        assert!(environment.collector_id.is_none());
    }

    #[tokio::test]
    async fn when_environment_is_complete_should_not_update() {
        let mut mock_updater = MockEnvironmentUpdater::default();
        mock_updater.expect_set_env().times(0);
        let mut environment = bootstrapped_environment();

        bootstrap_environment(&mut environment, &mock_updater, &InboundEvent::default()).await;
    }

    #[tokio::test]
    async fn when_update_config_name_is_missing_should_set_and_persist_it() {
        let mut mock_updater = MockEnvironmentUpdater::default();
        mock_updater
            .expect_set_env()
            .times(1)
            .withf(|vars| {
                vars == &HashMap::from([(
                    "aws_lambda_update_config_name".to_string(),
                    UPDATE_CONFIG_NAME.to_string(),
                )])
            })
            .returning(|_| Ok(()));
        let mut environment = CollectorEnvironment {
            aws_lambda_update_config_name: None,
            ..bootstrapped_environment()
        };

        bootstrap_environment(&mut environment, &mock_updater, &InboundEvent::default()).await;

        assert_eq!(
            environment.aws_lambda_update_config_name.as_deref(),
            Some(UPDATE_CONFIG_NAME)
        );
    }

    #[tokio::test]
    async fn when_stack_name_arrives_in_event_should_persist_it_with_application_id() {
        let mut mock_updater = MockEnvironmentUpdater::default();
        mock_updater
            .expect_set_env()
            .times(1)
            .withf(|vars| {
                vars.get("stack_name").map(String::as_str) == Some("new-stack")
                    && vars.get("al_application_id").map(String::as_str) == Some("guardduty")
            })
            .returning(|_| Ok(()));
        let mut environment = CollectorEnvironment {
            stack_name: None,
            ..bootstrapped_environment()
        };
        let event = InboundEvent {
            stack_name: Some("new-stack".to_string()),
            ..Default::default()
        };

        bootstrap_environment(&mut environment, &mock_updater, &event).await;
    }

    #[tokio::test]
    async fn when_second_update_conflicts_with_the_first_should_keep_the_first() {
        let mut mock_updater = MockEnvironmentUpdater::default();
        let mut sequence = mockall::Sequence::new();
        mock_updater
            .expect_set_env()
            .times(1)
            .in_sequence(&mut sequence)
            .withf(|vars| vars.contains_key("aws_lambda_update_config_name"))
            .returning(|_| Ok(()));
        mock_updater
            .expect_set_env()
            .times(1)
            .in_sequence(&mut sequence)
            .withf(|vars| vars.contains_key("al_application_id"))
            .returning(|_| Err("ResourceConflictException: update in progress".to_string()));
        let mut environment = CollectorEnvironment {
            aws_lambda_update_config_name: None,
            al_application_id: None,
            ..bootstrapped_environment()
        };

        bootstrap_environment(&mut environment, &mock_updater, &InboundEvent::default()).await;

        assert_eq!(
            environment.aws_lambda_update_config_name.as_deref(),
            Some(UPDATE_CONFIG_NAME)
        );
        assert!(environment.al_application_id.is_none());
    }

    #[tokio::test]
    async fn when_updates_fail_should_carry_on() {
        let mut mock_updater = MockEnvironmentUpdater::default();
        mock_updater
            .expect_set_env()
            .times(2)
            .returning(|_| Err("AccessDeniedException".to_string()));
        let mut environment = CollectorEnvironment::default();

        bootstrap_environment(&mut environment, &mock_updater, &InboundEvent::default()).await;

        assert_eq!(
            environment.aws_lambda_update_config_name.as_deref(),
            Some(UPDATE_CONFIG_NAME)
        );
    }
}
