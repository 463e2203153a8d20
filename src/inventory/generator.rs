//! Renders the CM-engine hosts inventory from an environment

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::ControllerError;
use crate::inventory::models::{Environment, Target, TargetKind};

#[derive(Serialize)]
struct HostsDocument {
    all: AllGroup,
}

#[derive(Serialize)]
struct AllGroup {
    vars: GlobalVars,
    children: BTreeMap<&'static str, HostGroup>,
}

#[derive(Serialize)]
struct GlobalVars {
    app_name: String,
    app_repo: String,
    app_branch: String,
    runtime_version: String,
    app_port: u16,
    deploy_user: String,
    timezone: String,
}

#[derive(Serialize)]
struct HostGroup {
    hosts: BTreeMap<String, HostVars>,
}

#[derive(Serialize)]
struct HostVars {
    ansible_host: String,
    ansible_user: String,
    ansible_port: u16,
    ansible_python_interpreter: String,
    ansible_ssh_private_key_file: String,
    ansible_become: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_port: Option<u16>,
}

fn host_vars(target: &Target) -> HostVars {
    HostVars {
        ansible_host: target.address.clone(),
        ansible_user: target.user.clone(),
        ansible_port: target.port,
        ansible_python_interpreter: "/usr/bin/python3".to_string(),
        ansible_ssh_private_key_file: target.key_path.clone(),
        ansible_become: target.escalate,
        app_port: (target.app_port > 0).then_some(target.app_port),
    }
}

/// Render the `hosts.yml` document the CM engine consumes.
///
/// Targets are grouped by role; group names follow the engine's conventions.
pub fn render_hosts(environment: &Environment) -> Result<String, ControllerError> {
    let mut groups: BTreeMap<&'static str, HostGroup> = BTreeMap::new();

    for target in &environment.targets {
        let group_name = match target.kind {
            TargetKind::Web => "webservers",
            TargetKind::Db => "dbservers",
            TargetKind::Monitoring => "monitoring",
        };
        groups
            .entry(group_name)
            .or_insert_with(|| HostGroup {
                hosts: BTreeMap::new(),
            })
            .hosts
            .insert(target.name.clone(), host_vars(target));
    }

    let document = HostsDocument {
        all: AllGroup {
            vars: GlobalVars {
                app_name: environment.config.app_name.clone(),
                app_repo: environment.config.app_repo.clone(),
                app_branch: environment.config.app_branch.clone(),
                runtime_version: environment.config.runtime_version.clone(),
                app_port: environment.config.app_port,
                deploy_user: environment.config.deploy_user.clone(),
                timezone: environment.config.timezone.clone(),
            },
            children: groups,
        },
    };

    Ok(serde_yaml::to_string(&document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::models::{EnvConfig, Services};

    fn sample_environment() -> Environment {
        Environment {
            name: "staging".to_string(),
            services: Services::default(),
            config: EnvConfig {
                app_name: "shopfront".to_string(),
                app_repo: "git@example.com:shop/front.git".to_string(),
                app_branch: "main".to_string(),
                runtime_version: "20".to_string(),
                app_port: 3000,
                deploy_user: "deploy".to_string(),
                timezone: "UTC".to_string(),
            },
            targets: vec![Target {
                name: "alpha".to_string(),
                address: "10.0.0.5".to_string(),
                port: 22,
                user: "root".to_string(),
                key_path: "~/.ssh/id_rsa".to_string(),
                kind: TargetKind::Web,
                app_port: 3000,
                http_port: 0,
                escalate: true,
            }],
        }
    }

    #[test]
    fn test_render_hosts_groups_by_role() {
        let rendered = render_hosts(&sample_environment()).unwrap();
        assert!(rendered.contains("webservers"));
        assert!(rendered.contains("ansible_host: 10.0.0.5"));
        assert!(rendered.contains("ansible_become: true"));
        assert!(!rendered.contains("dbservers"));
    }

    #[test]
    fn test_render_hosts_carries_global_vars() {
        let rendered = render_hosts(&sample_environment()).unwrap();
        assert!(rendered.contains("app_repo: git@example.com:shop/front.git"));
        assert!(rendered.contains("deploy_user: deploy"));
    }
}
