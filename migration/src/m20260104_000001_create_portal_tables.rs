use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Users::Email).string_len(256).not_null())
                    .col(ColumnDef::new(Users::DisplayName).string_len(128).null())
                    .col(
                        ColumnDef::new(Users::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Users::IsAdmin)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Users::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_users_email")
                    .table(Users::Table)
                    .col(Users::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Commissions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Commissions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Commissions::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Commissions::Slug).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Commissions::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_commissions_slug")
                    .table(Commissions::Table)
                    .col(Commissions::Slug)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CommissionProjects::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CommissionProjects::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CommissionProjects::CommissionId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CommissionProjects::Title)
                            .string_len(255)
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commission_projects_commission")
                            .from(CommissionProjects::Table, CommissionProjects::CommissionId)
                            .to(Commissions::Table, Commissions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CommissionMemberships::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CommissionMemberships::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CommissionMemberships::CommissionId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CommissionMemberships::UserId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CommissionMemberships::Role)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CommissionMemberships::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commission_memberships_commission")
                            .from(
                                CommissionMemberships::Table,
                                CommissionMemberships::CommissionId,
                            )
                            .to(Commissions::Table, Commissions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commission_memberships_user")
                            .from(CommissionMemberships::Table, CommissionMemberships::UserId)
                            .to(Users::Table, Users::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_commission_member")
                    .table(CommissionMemberships::Table)
                    .col(CommissionMemberships::CommissionId)
                    .col(CommissionMemberships::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Suggestions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Suggestions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Suggestions::Title).string_len(255).not_null())
                    .col(ColumnDef::new(Suggestions::Category).string_len(64).null())
                    .col(
                        ColumnDef::new(Suggestions::Status)
                            .string_len(16)
                            .not_null()
                            .default("pendiente"),
                    )
                    .col(ColumnDef::new(Suggestions::CreatedBy).integer().not_null())
                    .col(
                        ColumnDef::new(Suggestions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Suggestions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_suggestions_created_by")
                            .from(Suggestions::Table, Suggestions::CreatedBy)
                            .to(Users::Table, Users::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_suggestions_category")
                    .table(Suggestions::Table)
                    .col(Suggestions::Category)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Suggestions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CommissionMemberships::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CommissionProjects::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Commissions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
pub(crate) enum Users {
    Table,
    Id,
    Email,
    DisplayName,
    IsActive,
    IsAdmin,
    CreatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum Commissions {
    Table,
    Id,
    Name,
    Slug,
    IsActive,
}

#[derive(DeriveIden)]
enum CommissionProjects {
    Table,
    Id,
    CommissionId,
    Title,
}

#[derive(DeriveIden)]
enum CommissionMemberships {
    Table,
    Id,
    CommissionId,
    UserId,
    Role,
    IsActive,
}

#[derive(DeriveIden)]
pub(crate) enum Suggestions {
    Table,
    Id,
    Title,
    Category,
    Status,
    CreatedBy,
    CreatedAt,
    UpdatedAt,
}
