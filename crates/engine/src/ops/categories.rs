use uuid::Uuid;

use sea_orm::{QueryFilter, QueryOrder, TransactionTrait, prelude::*};

use crate::{
    Category, CategoryType, EngineError, ResultEngine, categories,
    util::{normalize_key, normalize_required_name, parse_uuid},
};

use super::{Engine, with_tx};

impl Engine {
    /// Add a new category.
    ///
    /// The same name may be used once for income and once for expense.
    pub async fn new_category(&self, name: &str, kind: CategoryType) -> ResultEngine<Uuid> {
        let name = normalize_required_name(name, "category")?;
        let created: ResultEngine<Uuid> = with_tx!(self, |db_tx| {
            let exists = categories::Entity::find()
                .filter(categories::Column::NameNorm.eq(normalize_key(&name)))
                .filter(categories::Column::Kind.eq(kind.as_str()))
                .one(&db_tx)
                .await?
                .is_some();
            if exists {
                return Err(EngineError::ExistingKey(name));
            }

            let category = Category::new(name, kind);
            categories::ActiveModel::from(&category)
                .insert(&db_tx)
                .await?;
            Ok(category.id)
        });
        let category_id = created?;
        self.changes.notify("categories");
        tracing::info!(%category_id, kind = kind.as_str(), "category created");
        Ok(category_id)
    }

    /// Return every category, grouped by kind and sorted by name.
    pub async fn categories(&self) -> ResultEngine<Vec<Category>> {
        categories::Entity::find()
            .order_by_asc(categories::Column::Kind)
            .order_by_asc(categories::Column::NameNorm)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Category::try_from)
            .collect()
    }

    /// Look up a category from user input.
    ///
    /// An absent or blank id is rejected before touching the database.
    pub async fn find_category(&self, category_id: Option<&str>) -> ResultEngine<Category> {
        let raw = category_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EngineError::InvalidId("provide a valid category id".to_string()))?;
        let category_id = parse_uuid(raw, "category")?;
        self.category(category_id).await
    }

    pub async fn category(&self, category_id: Uuid) -> ResultEngine<Category> {
        let model = categories::Entity::find_by_id(category_id.to_string())
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("category not exists".to_string()))?;
        Category::try_from(model)
    }
}
