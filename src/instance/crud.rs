//! Instance CRUD operations.

use chrono::Utc;

use super::types::{CreateInstance, Instance, InstanceConfig, InstanceStatus};
use crate::error::{AppError, ErrorKind, Result};
use crate::hardware::HardwareType;
use crate::orchestrator::Orchestrator;
use crate::validation::{normalize_instance_config, normalize_name};

impl Orchestrator {
    /// Create a new idle instance from the type defaults plus any overrides.
    ///
    /// Everything that can be rejected is checked before an id is allocated.
    pub fn create(&self, request: CreateInstance) -> Result<Instance> {
        let CreateInstance {
            project_name,
            hardware_type,
            overrides,
        } = request;

        let hardware_type: HardwareType = hardware_type.parse()?;
        let project_name = normalize_name(&project_name, "Project name")?;
        if self
            .instances
            .exists_by_name_and_type(&project_name, hardware_type)
        {
            return Err(AppError::duplicate_project(
                &project_name,
                hardware_type.as_str(),
            ));
        }

        let config = normalize_instance_config(overrides.merge(hardware_type.defaults()))?;
        let id = self.allocator.allocate(hardware_type)?;

        let instance = Instance {
            id,
            project_name,
            hardware_type,
            port: config.port,
            baud_rate: config.baud_rate,
            num_cycles: config.num_cycles,
            command_delay: config.command_delay,
            commands: config.commands,
            status: InstanceStatus::Idle,
            created_at: Utc::now(),
        };
        self.instances.insert(instance.clone())?;

        log::info!(
            "Created instance {} '{}' on {}",
            instance.id,
            instance.project_name,
            instance.port
        );
        Ok(instance)
    }

    /// Whether `project_name` is still free for the hardware type.
    pub fn check_name(&self, project_name: &str, hardware_type: &str) -> Result<()> {
        let hardware_type: HardwareType = hardware_type.parse()?;
        let project_name = normalize_name(project_name, "Project name")?;
        if self
            .instances
            .exists_by_name_and_type(&project_name, hardware_type)
        {
            return Err(AppError::duplicate_project(
                &project_name,
                hardware_type.as_str(),
            ));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Instance> {
        self.instances.get(id)
    }

    pub fn list(&self) -> Vec<Instance> {
        self.instances.list()
    }

    /// Replace the configuration of an idle instance.
    pub fn update(&self, id: &str, config: InstanceConfig) -> Result<Instance> {
        self.instances.get(id)?;
        if self.supervisor.is_running(id) {
            return Err(AppError::instance_busy(id));
        }

        let config = normalize_instance_config(config)?;
        let instance = self.instances.update_config(id, config)?;
        log::info!("Updated instance {}", id);
        Ok(instance)
    }

    /// Copy a command set's script onto the instance. Allowed while running;
    /// the worker picks it up on its next start.
    pub fn select_command_set(&self, id: &str, command_set_id: u64) -> Result<Instance> {
        let (instance, set) = self.instances.update_commands(id, command_set_id)?;
        log::info!("Instance {} now uses command set '{}'", id, set.name);
        Ok(instance)
    }

    /// Delete an instance, stopping its worker first.
    pub fn delete(&self, id: &str) -> Result<Instance> {
        self.instances.get(id)?;

        if self.supervisor.is_running(id) {
            match self.supervisor.stop(id) {
                Ok(()) => log::info!("Stopped instance {} before deletion", id),
                Err(e) if e.kind() == ErrorKind::NotRunning => {}
                Err(e) => return Err(e),
            }
        }

        let instance = self.instances.delete(id)?;
        log::info!("Deleted instance {} '{}'", id, instance.project_name);
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::instance::InstanceOverrides;
    use crate::test_support::{temp_store, ShellWorker};

    fn orchestrator() -> (tempfile::TempDir, Orchestrator) {
        let (dir, store) = temp_store();
        let orch = Orchestrator::new(store, Arc::new(ShellWorker::new("exit 0")));
        orch.seed_defaults().unwrap();
        (dir, orch)
    }

    fn request(name: &str, hardware_type: &str, overrides: InstanceOverrides) -> CreateInstance {
        CreateInstance {
            project_name: name.to_string(),
            hardware_type: hardware_type.to_string(),
            overrides,
        }
    }

    #[test]
    fn create_applies_defaults_and_allocates_ids() {
        let (_dir, orch) = orchestrator();

        let first = orch
            .create(request("Bench A", "qtap", InstanceOverrides::default()))
            .unwrap();
        assert_eq!(first.id, "qtap_1");
        assert_eq!(first.port, "/dev/ttyUSB0");
        assert_eq!(first.num_cycles, 5);
        assert_eq!(first.commands, vec!["i:", "r:"]);
        assert_eq!(first.status, InstanceStatus::Idle);

        let second = orch
            .create(request(
                "Bench B",
                "qtap",
                InstanceOverrides {
                    port: Some("COM4".to_string()),
                    command_delay: Some(0.5),
                    ..Default::default()
                },
            ))
            .unwrap();
        assert_eq!(second.id, "qtap_2");
        assert_eq!(second.port, "COM4");
        assert_eq!(second.command_delay, 0.5);

        let ids: Vec<String> = orch.list().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["qtap_1", "qtap_2"]);
    }

    #[test]
    fn create_rejects_before_allocating() {
        let (_dir, orch) = orchestrator();
        orch.create(request("bench", "qba", InstanceOverrides::default()))
            .unwrap();

        let err = orch
            .create(request(" bench ", "qba", InstanceOverrides::default()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateProject);

        let err = orch
            .create(request(
                "other",
                "qba",
                InstanceOverrides {
                    baud_rate: Some(0),
                    ..Default::default()
                },
            ))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = orch
            .create(request("other", "qzz", InstanceOverrides::default()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = orch
            .create(request("   ", "qba", InstanceOverrides::default()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let next = orch
            .create(request("other", "qba", InstanceOverrides::default()))
            .unwrap();
        assert_eq!(next.id, "qba_2");
    }

    #[test]
    fn same_name_is_fine_across_types() {
        let (_dir, orch) = orchestrator();
        orch.create(request("bench", "qbq", InstanceOverrides::default()))
            .unwrap();

        assert_eq!(
            orch.check_name("bench", "qbq").unwrap_err().kind(),
            ErrorKind::DuplicateProject
        );
        orch.check_name("bench", "qswipe").unwrap();
        assert_eq!(
            orch.check_name("", "qswipe").unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn update_replaces_config_wholesale() {
        let (_dir, orch) = orchestrator();
        let instance = orch
            .create(request("bench", "qswipe", InstanceOverrides::default()))
            .unwrap();

        let config = InstanceConfig {
            port: " COM8 ".to_string(),
            baud_rate: 9600,
            num_cycles: 3,
            command_delay: 0.25,
            commands: vec!["i:".to_string()],
        };
        let updated = orch.update(&instance.id, config).unwrap();
        assert_eq!(updated.port, "COM8");
        assert_eq!(updated.baud_rate, 9600);
        assert_eq!(updated.commands, vec!["i:"]);
        assert_eq!(updated.created_at, instance.created_at);

        let mut bad = updated.config();
        bad.commands = vec![" ".to_string()];
        assert_eq!(
            orch.update(&instance.id, bad).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            orch.update("qswipe_9", updated.config()).unwrap_err().kind(),
            ErrorKind::InstanceNotFound
        );
    }

    #[test]
    fn select_command_set_copies_commands() {
        let (_dir, orch) = orchestrator();
        let instance = orch
            .create(request("bench", "qbq", InstanceOverrides::default()))
            .unwrap();
        let default = orch.list_command_sets(HardwareType::Qbq).remove(0);

        let updated = orch.select_command_set(&instance.id, default.id).unwrap();
        assert_eq!(updated.commands, default.commands);

        assert_eq!(
            orch.select_command_set(&instance.id, 999).unwrap_err().kind(),
            ErrorKind::CommandSetNotFound
        );
        assert_eq!(
            orch.select_command_set("qbq_7", default.id).unwrap_err().kind(),
            ErrorKind::InstanceNotFound
        );
    }

    #[test]
    fn delete_idle_instance() {
        let (_dir, orch) = orchestrator();
        let instance = orch
            .create(request("bench", "qtap", InstanceOverrides::default()))
            .unwrap();

        orch.delete(&instance.id).unwrap();
        assert!(orch.list().is_empty());
        assert_eq!(
            orch.delete(&instance.id).unwrap_err().kind(),
            ErrorKind::InstanceNotFound
        );

        // Ids are never reused.
        let next = orch
            .create(request("bench", "qtap", InstanceOverrides::default()))
            .unwrap();
        assert_eq!(next.id, "qtap_2");
    }
}
