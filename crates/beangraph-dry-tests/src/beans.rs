// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fixture beans whose graphs contain cycles.
//!
//! A [`Project`] owns its [`Task`]s and every task points back at its project,
//! so encoding any project walks a cycle. Tasks may also list other tasks of
//! the same project they are blocked by.

use beangraph_core::{
    BeanCatalog, BeanSchema, CatalogError, CodecError, IntrospectionError, Property, populate,
};
use std::fmt;
use std::sync::{Arc, OnceLock};

fn require<'a, T>(
    cell: &'a OnceLock<T>,
    bean: &'static str,
    property: &'static str,
) -> Result<&'a T, CodecError> {
    cell.get()
        .ok_or_else(|| CodecError::Payload(format!("{bean}.{property} is not populated")))
}

/// A project and its tasks.
#[derive(Default)]
pub struct Project {
    /// Project name.
    pub name: OnceLock<String>,
    /// Tasks, each pointing back at this project.
    pub tasks: OnceLock<Vec<Arc<Task>>>,
}

impl Project {
    /// Name, or `""` while unpopulated.
    pub fn name(&self) -> &str {
        self.name.get().map_or("", String::as_str)
    }

    /// Tasks, or an empty slice while unpopulated.
    pub fn tasks(&self) -> &[Arc<Task>] {
        self.tasks.get().map_or(&[], Vec::as_slice)
    }
}

impl BeanSchema for Project {
    const TYPE_NAME: &'static str = "fixture.Project";

    fn new_empty() -> Self {
        Self::default()
    }

    fn properties() -> Result<Vec<Property<Self>>, IntrospectionError> {
        Ok(vec![
            Property::<Self>::new(
                "name",
                |bean, ctx| ctx.write_string(require(&bean.name, Self::TYPE_NAME, "name")?),
                |bean, ctx| populate(&bean.name, ctx.read_string()?, Self::TYPE_NAME, "name"),
            ),
            Property::<Self>::new(
                "tasks",
                |bean, ctx| {
                    let tasks = require(&bean.tasks, Self::TYPE_NAME, "tasks")?;
                    ctx.write_collection(tasks, |ctx, task| ctx.write_bean_of(task))
                },
                |bean, ctx| {
                    let tasks = ctx.read_collection(|ctx| ctx.read_bean_of::<Task>())?;
                    populate(&bean.tasks, tasks, Self::TYPE_NAME, "tasks")
                },
            ),
        ])
    }
}

/// A task that refers back to its project.
#[derive(Default)]
pub struct Task {
    /// Task title.
    pub title: OnceLock<String>,
    /// Owning project.
    pub project: OnceLock<Arc<Project>>,
    /// Tasks that must finish first.
    pub blocked_by: OnceLock<Vec<Arc<Task>>>,
}

impl Task {
    /// Title, or `""` while unpopulated.
    pub fn title(&self) -> &str {
        self.title.get().map_or("", String::as_str)
    }

    /// Owning project, once populated.
    pub fn project(&self) -> Option<&Arc<Project>> {
        self.project.get()
    }

    /// Blocking tasks, or an empty slice while unpopulated.
    pub fn blocked_by(&self) -> &[Arc<Task>] {
        self.blocked_by.get().map_or(&[], Vec::as_slice)
    }
}

impl BeanSchema for Task {
    const TYPE_NAME: &'static str = "fixture.Task";

    fn new_empty() -> Self {
        Self::default()
    }

    fn properties() -> Result<Vec<Property<Self>>, IntrospectionError> {
        Ok(vec![
            Property::<Self>::new(
                "title",
                |bean, ctx| ctx.write_string(require(&bean.title, Self::TYPE_NAME, "title")?),
                |bean, ctx| populate(&bean.title, ctx.read_string()?, Self::TYPE_NAME, "title"),
            ),
            Property::<Self>::new(
                "project",
                |bean, ctx| ctx.write_bean_of(require(&bean.project, Self::TYPE_NAME, "project")?),
                |bean, ctx| {
                    let project = ctx.read_bean_of::<Project>()?;
                    populate(&bean.project, project, Self::TYPE_NAME, "project")
                },
            ),
            Property::<Self>::new(
                "blocked_by",
                |bean, ctx| {
                    ctx.write_collection(bean.blocked_by(), |ctx, task| ctx.write_bean_of(task))
                },
                |bean, ctx| {
                    let tasks = ctx.read_collection(|ctx| ctx.read_bean_of::<Self>())?;
                    populate(&bean.blocked_by, tasks, Self::TYPE_NAME, "blocked_by")
                },
            ),
        ])
    }
}

// Project and task reference each other; Debug prints names only.
impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name())
            .field("tasks", &self.tasks().iter().map(|t| t.title()).collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("title", &self.title())
            .field("project", &self.project().map(|p| p.name()))
            .field(
                "blocked_by",
                &self.blocked_by().iter().map(|t| t.title()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Catalog with [`Project`] and [`Task`] registered.
pub fn fixture_catalog() -> Result<BeanCatalog, CatalogError> {
    BeanCatalog::new().with::<Project>()?.with::<Task>()
}

/// Builds a project named `name` with one task per title.
///
/// Task `i` is blocked by task `i - 1`.
pub fn project_with_tasks(name: &str, titles: &[&str]) -> Arc<Project> {
    let project = Arc::new(Project::default());
    let _ = project.name.set(name.to_string());
    let mut tasks: Vec<Arc<Task>> = Vec::with_capacity(titles.len());
    for title in titles {
        let task = Task::default();
        let _ = task.title.set((*title).to_string());
        let _ = task.project.set(Arc::clone(&project));
        let _ = task.blocked_by.set(tasks.last().map(Arc::clone).into_iter().collect());
        tasks.push(Arc::new(task));
    }
    let _ = project.tasks.set(tasks);
    project
}
