mod retention_plugins;

pub use retention_plugins::PostgresRetentionPluginRepo;
