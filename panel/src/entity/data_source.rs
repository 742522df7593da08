use sea_orm::entity::prelude::*;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "data_source")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub name: String,
    /// Dialect name as entered (`postgresql`, `mysql`, `mariadb`, `mssql`).
    pub dialect: String,
    /// AES-256-GCM encrypted base64 of the credentials JSON
    pub encrypted_credentials: String,
    /// JSON text: non-secret per-source options
    pub options: String,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::column_option::Entity")]
    ColumnOption,
}

impl Related<super::column_option::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ColumnOption.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
