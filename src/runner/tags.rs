//! Catalog of engine task tags
//!
//! Tags are an opaque comma-separated filter from the engine's point of view;
//! this catalog is what the driver offers operators to compose one.

/// A named group of related tags
#[derive(Debug, Clone)]
pub struct TagCategory {
    pub name: &'static str,
    pub description: &'static str,
    pub tags: Vec<TagOption>,
}

/// One selectable tag
#[derive(Debug, Clone)]
pub struct TagOption {
    pub name: &'static str,
    pub description: &'static str,
    pub selected: bool,
}

fn tag(name: &'static str, description: &'static str, selected: bool) -> TagOption {
    TagOption {
        name,
        description,
        selected,
    }
}

/// Tag categories for the provision playbook
pub fn provision_catalog() -> Vec<TagCategory> {
    vec![
        TagCategory {
            name: "System Base",
            description: "Packages and system configuration",
            tags: vec![
                tag("common", "All common tasks", true),
                tag("packages", "Package installation and updates", true),
                tag("apt", "APT operations", true),
                tag("upgrade", "System upgrade", false),
                tag("users", "User management", true),
                tag("config", "System configuration", true),
            ],
        },
        TagCategory {
            name: "Security",
            description: "Firewall, SSH, and security hardening",
            tags: vec![
                tag("security", "All security tasks", true),
                tag("firewall", "Firewall configuration", true),
                tag("ufw", "UFW firewall", true),
                tag("fail2ban", "Fail2ban setup", true),
                tag("ssh", "SSH configuration", true),
                tag("hardening", "Security hardening", true),
            ],
        },
        TagCategory {
            name: "Runtime & Services",
            description: "Application runtime and web services",
            tags: vec![
                tag("nodejs", "Node.js installation", true),
                tag("nginx", "Nginx web server", true),
                tag("postgresql", "PostgreSQL database", true),
            ],
        },
        TagCategory {
            name: "Monitoring",
            description: "Monitoring and observability",
            tags: vec![tag("monitoring", "Monitoring tools", false)],
        },
    ]
}

/// Tag categories for the deploy playbook
pub fn deploy_catalog() -> Vec<TagCategory> {
    vec![TagCategory {
        name: "Application",
        description: "Application deployment",
        tags: vec![
            tag("deploy", "All deployment tasks", true),
            tag("code", "Code deployment", true),
            tag("health", "Health checks", true),
        ],
    }]
}

/// Join the selected tags into the comma-separated filter the engine takes.
pub fn format_tags(categories: &[TagCategory]) -> String {
    categories
        .iter()
        .flat_map(|category| category.tags.iter())
        .filter(|tag| tag.selected)
        .map(|tag| tag.name)
        .collect::<Vec<_>>()
        .join(",")
}

/// Names of the selected tags across the catalog.
pub fn selected_tags(categories: &[TagCategory]) -> Vec<String> {
    categories
        .iter()
        .flat_map(|category| category.tags.iter())
        .filter(|tag| tag.selected)
        .map(|tag| tag.name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tags_joins_selected() {
        let catalog = deploy_catalog();
        assert_eq!(format_tags(&catalog), "deploy,code,health");
    }

    #[test]
    fn test_unselected_tags_are_excluded() {
        let catalog = provision_catalog();
        let formatted = format_tags(&catalog);
        assert!(!formatted.contains("upgrade"));
        assert!(formatted.contains("nginx"));
        assert_eq!(selected_tags(&catalog).len(), formatted.split(',').count());
    }
}
