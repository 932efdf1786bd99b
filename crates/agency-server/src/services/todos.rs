//! Personal todos, scoped to the agency and the user who wrote them

use super::{clean, required_text, TenantContext};
use agency_core::ports::{tables, Query};
use agency_core::{AgencyError, Result, Store, StoreExt};
use agency_types::{Todo, TodoCreate, TodoUpdate};
use chrono::Utc;
use std::sync::Arc;

const MAX_TITLE_LEN: usize = 200;

pub struct TodoService {
    store: Arc<dyn Store>,
}

impl TodoService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list(&self, ctx: &TenantContext, completed: Option<bool>) -> Result<Vec<Todo>> {
        let mut query = Query::new()
            .eq("agency_id", ctx.agency_id())
            .eq("user_id", ctx.user_id());
        if let Some(completed) = completed {
            query = query.eq("completed", completed);
        }
        self.store
            .select_as(tables::TODOS, &query.order_by("created_at", false))
            .await
    }

    async fn load(&self, ctx: &TenantContext, id: &str) -> Result<Todo> {
        self.store
            .get_as::<Todo>(tables::TODOS, id)
            .await?
            .filter(|t| t.agency_id == ctx.agency_id() && t.user_id == ctx.user_id())
            .ok_or_else(|| AgencyError::not_found("Todo", id))
    }

    pub async fn create(&self, ctx: &TenantContext, req: TodoCreate) -> Result<Todo> {
        let now = Utc::now();
        let todo = Todo {
            id: agency_types::new_id(),
            agency_id: ctx.agency_id().to_string(),
            user_id: ctx.user_id().to_string(),
            title: required_text("Title", &req.title, MAX_TITLE_LEN)?,
            description: clean(req.description),
            due_date: req.due_date,
            priority: req.priority.unwrap_or_default(),
            completed: false,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_as(tables::TODOS, &todo).await
    }

    pub async fn update(&self, ctx: &TenantContext, id: &str, req: TodoUpdate) -> Result<Todo> {
        let mut todo = self.load(ctx, id).await?;

        if let Some(title) = req.title {
            todo.title = required_text("Title", &title, MAX_TITLE_LEN)?;
        }
        if req.description.is_some() {
            todo.description = clean(req.description);
        }
        if req.due_date.is_some() {
            todo.due_date = req.due_date;
        }
        if let Some(priority) = req.priority {
            todo.priority = priority;
        }
        if let Some(completed) = req.completed {
            if completed != todo.completed {
                todo.completed = completed;
                todo.completed_at = completed.then(Utc::now);
            }
        }
        todo.updated_at = Utc::now();

        self.store
            .update_as(tables::TODOS, id, &todo)
            .await?
            .ok_or_else(|| AgencyError::not_found("Todo", id))
    }

    pub async fn delete(&self, ctx: &TenantContext, id: &str) -> Result<()> {
        self.load(ctx, id).await?;
        self.store.delete(tables::TODOS, id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{store, tenant};
    use agency_types::{Agency, MemberRole, TodoPriority};

    fn create(title: &str) -> TodoCreate {
        TodoCreate {
            title: title.to_string(),
            description: None,
            due_date: None,
            priority: None,
        }
    }

    #[tokio::test]
    async fn test_complete_and_filter() {
        let todos = TodoService::new(store().await);
        let agency = Agency::new("Acme", "u1");
        let ctx = tenant(&agency, "u1", MemberRole::Owner);

        let call = todos.create(&ctx, create("Call Ann")).await.unwrap();
        todos.create(&ctx, create("Send invoice")).await.unwrap();
        assert_eq!(call.priority, TodoPriority::Medium);

        let done = todos
            .update(
                &ctx,
                &call.id,
                TodoUpdate {
                    completed: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(done.completed);
        assert!(done.completed_at.is_some());

        let open = todos.list(&ctx, Some(false)).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].title, "Send invoice");
        assert_eq!(todos.list(&ctx, None).await.unwrap().len(), 2);

        let reopened = todos
            .update(
                &ctx,
                &call.id,
                TodoUpdate {
                    completed: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(reopened.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_todos_are_private() {
        let todos = TodoService::new(store().await);
        let agency = Agency::new("Acme", "u1");
        let mine = tenant(&agency, "u1", MemberRole::Owner);
        let theirs = tenant(&agency, "u2", MemberRole::Member);

        let todo = todos.create(&mine, create("Mine")).await.unwrap();
        assert!(todos.list(&theirs, None).await.unwrap().is_empty());
        assert!(matches!(
            todos.delete(&theirs, &todo.id).await,
            Err(AgencyError::NotFound(_))
        ));
        assert!(todos.create(&mine, create("  ")).await.is_err());
    }
}
