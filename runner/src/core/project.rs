//! Project identity and the plan artifact names derived from it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identifies a project within a larger workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectIdentity {
    /// Owning namespace, usually `<org>/<repo>`.
    pub namespace: String,
    /// Project name, unique within the namespace.
    pub name: String,
    /// Project working directory.
    pub path: PathBuf,
}

impl ProjectIdentity {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            path: path.into(),
        }
    }

    /// `<namespace>#<name>`, used for log fields, report headers and lock ids.
    pub fn label(&self) -> String {
        format!("{}#{}", self.namespace, self.name)
    }

    /// `<namespace with '/' replaced by ':'>#<name>`, safe as a single path segment.
    pub fn file_stem(&self) -> String {
        format!("{}#{}", self.namespace.replace('/', ":"), self.name)
    }
}

/// Names for the plan artifact of one project.
pub trait PlanPathProvider {
    /// Bare file name passed to `plan -out`.
    fn plan_file_name(&self) -> String;
    /// Where the tool writes the plan inside the project directory.
    fn local_plan_file_path(&self) -> PathBuf;
    /// Key under which the plan is kept in the artifact store.
    fn stored_plan_file_path(&self) -> String;
}

/// Derives plan artifact names from a [`ProjectIdentity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPathProvider {
    project: ProjectIdentity,
}

impl ProjectPathProvider {
    pub fn new(project: ProjectIdentity) -> Self {
        Self { project }
    }
}

impl PlanPathProvider for ProjectPathProvider {
    fn plan_file_name(&self) -> String {
        format!("{}.tfplan", self.project.file_stem())
    }

    fn local_plan_file_path(&self) -> PathBuf {
        self.project.path.join(self.plan_file_name())
    }

    fn stored_plan_file_path(&self) -> String {
        let namespace = self.project.namespace.trim_end_matches('/');
        if namespace.is_empty() {
            return self.plan_file_name();
        }
        format!("{namespace}/{}", self.plan_file_name())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::Path;

    use super::*;

    fn provider(namespace: &str, name: &str, path: &str) -> ProjectPathProvider {
        ProjectPathProvider::new(ProjectIdentity::new(namespace, name, path))
    }

    #[test]
    fn slashes_in_namespace_become_colons() {
        let paths = provider("org/repo", "prod", "infra/prod");
        assert_eq!(paths.plan_file_name(), "org:repo#prod.tfplan");
        assert_eq!(
            paths.local_plan_file_path(),
            Path::new("infra/prod").join("org:repo#prod.tfplan")
        );
        assert_eq!(paths.stored_plan_file_path(), "org/repo/org:repo#prod.tfplan");
    }

    #[test]
    fn empty_namespace_stores_at_top_level() {
        let paths = provider("", "dev", ".");
        assert_eq!(paths.plan_file_name(), "#dev.tfplan");
        assert_eq!(paths.stored_plan_file_path(), "#dev.tfplan");
    }

    #[test]
    fn derivation_is_stable_across_calls() {
        let paths = provider("a/b/c", "svc", "dir");
        let first = (
            paths.plan_file_name(),
            paths.local_plan_file_path(),
            paths.stored_plan_file_path(),
        );
        for _ in 0..3 {
            assert_eq!(paths.plan_file_name(), first.0);
            assert_eq!(paths.local_plan_file_path(), first.1);
            assert_eq!(paths.stored_plan_file_path(), first.2);
        }
    }

    #[test]
    fn distinct_identities_do_not_collide() {
        let identities = [
            ("org/repo", "prod"),
            ("org/repo", "staging"),
            ("org/other", "prod"),
            ("org", "repo-prod"),
            ("org/repo/sub", "prod"),
            ("team/repo", "prod"),
        ];
        let keys: HashSet<String> = identities
            .iter()
            .map(|(ns, name)| provider(ns, name, ".").stored_plan_file_path())
            .collect();
        assert_eq!(keys.len(), identities.len());
    }

    #[test]
    fn label_joins_namespace_and_name() {
        let project = ProjectIdentity::new("org/repo", "prod", ".");
        assert_eq!(project.label(), "org/repo#prod");
    }
}
