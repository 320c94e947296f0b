// Core Domain
// スクリプト、ジャーナル、プラン、実行結果などの純粋なドメインモデル

pub mod config;
pub mod error;
pub mod journal;
pub mod migration;
pub mod naming;
pub mod script;
