use crate::types::{AgentRegistration, AgentRole};
use std::path::Path;

/// The fixed eight-agent roster: one project manager, four developers, two
/// QA engineers and one UX designer. Each agent works in its own
/// subdirectory of `base_dir`.
pub fn default_roster(base_dir: &Path) -> Vec<AgentRegistration> {
    let mut roster = vec![member(base_dir, "project-manager", AgentRole::ProjectManager)];
    for i in 1..=4 {
        roster.push(member(base_dir, &format!("developer-{i}"), AgentRole::Developer));
    }
    for i in 1..=2 {
        roster.push(member(base_dir, &format!("qa-{i}"), AgentRole::Qa));
    }
    roster.push(member(base_dir, "ux-designer", AgentRole::UxDesigner));
    roster
}

fn member(base_dir: &Path, agent_id: &str, role: AgentRole) -> AgentRegistration {
    AgentRegistration::new(agent_id, role).with_working_directory(base_dir.join(agent_id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_roster_count() {
        assert_eq!(default_roster(Path::new("/work")).len(), 8);
    }

    #[test]
    fn test_role_mix() {
        let roster = default_roster(Path::new("/work"));
        let count = |role| roster.iter().filter(|r| r.role == role).count();
        assert_eq!(count(AgentRole::ProjectManager), 1);
        assert_eq!(count(AgentRole::Developer), 4);
        assert_eq!(count(AgentRole::Qa), 2);
        assert_eq!(count(AgentRole::UxDesigner), 1);
    }

    #[test]
    fn test_unique_ids_and_directories() {
        let roster = default_roster(Path::new("/work"));
        let ids: HashSet<_> = roster.iter().map(|r| r.agent_id.clone()).collect();
        assert_eq!(ids.len(), roster.len());
        let qa = roster.iter().find(|r| r.agent_id == "qa-2").unwrap();
        assert_eq!(qa.working_directory, Path::new("/work/qa-2"));
    }
}
