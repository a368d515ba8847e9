//! Forum indexer - firehose consumer for forum records

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use forum_indexer::{
    config::Args,
    identity::{verifier, DirectoryAccountAge, HttpIdentityDirectory, IdentityVerifier},
    ingest::{EventConsumer, IndexerSet, RecordDispatcher},
    logging::{self, IngestStats},
    projection::ProjectionIndexer,
    store::{
        KeyValueCache, MemoryKeyValueCache, MemoryRecordStore, MongoClient, MongoKeyValueCache,
        MongoRecordStore, RecordStore,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init_tracing(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Forum Indexer");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!(
        "Build: {} ({})",
        env!("GIT_COMMIT_SHORT"),
        env!("BUILD_TIMESTAMP")
    );
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("NATS: {} ({})", args.nats.nats_url, args.nats.event_subject);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Directory: {}", args.identity_directory_url);
    info!("Verify authors: {}", args.verify_authors);
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Some(client)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory stores): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let (store, cache): (Arc<dyn RecordStore>, Arc<dyn KeyValueCache>) = match &mongo {
        Some(mongo) => (
            Arc::new(MongoRecordStore::new(mongo).await?),
            Arc::new(MongoKeyValueCache::new(mongo).await?),
        ),
        None => (
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemoryKeyValueCache::new()),
        ),
    };

    let directory = Arc::new(HttpIdentityDirectory::new(args.directory_config())?);
    let account_age = Arc::new(DirectoryAccountAge::new(
        directory.base_url(),
        directory.http_client(),
    ));

    let stats = Arc::new(IngestStats::new());
    let indexers = IndexerSet::uniform(Arc::new(ProjectionIndexer::new(store.clone())));
    let missing = indexers.missing();
    if !missing.is_empty() {
        error!("No indexer registered for: {:?}", missing);
        std::process::exit(1);
    }
    let mut dispatcher = RecordDispatcher::new(indexers, store, account_age).with_stats(stats);

    if args.verify_authors {
        let config = args.verifier_config();
        verifier::log_config(&config);
        dispatcher =
            dispatcher.with_identity_verifier(IdentityVerifier::with_config(config, cache, directory));
    }

    let consumer =
        EventConsumer::connect(&args.nats, args.consumer_config(), Arc::new(dispatcher)).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    consumer.run(shutdown_rx).await?;

    info!("Forum indexer stopped");
    Ok(())
}
