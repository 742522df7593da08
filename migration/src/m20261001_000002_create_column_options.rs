use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ColumnOption::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ColumnOption::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ColumnOption::DataSourceId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ColumnOption::TableName).string().not_null())
                    .col(ColumnDef::new(ColumnOption::ColumnName).string().not_null())
                    .col(
                        ColumnDef::new(ColumnOption::Updates)
                            .text()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(ColumnOption::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ColumnOption::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_column_option_datasource")
                            .from(ColumnOption::Table, ColumnOption::DataSourceId)
                            .to(DataSource::Table, DataSource::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_column_option_unique")
                    .table(ColumnOption::Table)
                    .col(ColumnOption::DataSourceId)
                    .col(ColumnOption::TableName)
                    .col(ColumnOption::ColumnName)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ColumnOption::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ColumnOption {
    Table,
    Id,
    DataSourceId,
    TableName,
    ColumnName,
    Updates,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum DataSource {
    Table,
    Id,
}
