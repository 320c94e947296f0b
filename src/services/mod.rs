// Services Layer
// マイグレーションのドメインロジックを実行するサービス層

pub mod executor;
pub mod journal_store;
pub mod migrator;
pub mod planner;
