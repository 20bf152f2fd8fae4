//! CLI `inspect` command: catalog details for one collection, or a listing.

use anyhow::Result;

use hazard_index::config::HazardConfig;
use hazard_index::store::VectorStore;

pub fn inspect(config: &HazardConfig, collection: Option<&str>) -> Result<()> {
    let db_path = config.resolved_db_path();
    let store = VectorStore::open(&db_path)?;

    let Some(name) = collection else {
        let names = store.list_collections()?;
        println!("Vector store: {}", db_path.display());
        println!("sqlite-vec:   {}", store.vec_version()?);
        if names.is_empty() {
            println!("No collections.");
            return Ok(());
        }
        println!();
        for name in names {
            let info = store.describe(&name)?;
            println!("  {:<32} {:<10} {} rows", info.name, info.state, info.row_count);
        }
        return Ok(());
    };

    let info = store.describe(name)?;
    let handle = store.collection(name)?;

    println!("Collection: {}", info.name);
    println!("{}", "=".repeat(50));
    println!("  State:          {}", info.state);
    println!("  Rows:           {}", info.row_count);
    println!("  Build:          {}", info.build_id);
    if let Some(ref model) = info.embedding_model {
        println!("  Model:          {model}");
    }
    match info.index_params {
        Some(ref p) => println!(
            "  Index:          {:?} metric={} nlist={}",
            p.kind, p.metric, p.nlist
        ),
        None => println!("  Index:          none"),
    }
    println!("  Created:        {}", info.created_at);
    println!("  Updated:        {}", info.updated_at);
    println!();
    println!("Schema: {}", handle.schema().description);
    for field in &handle.schema().fields {
        println!("  {:<16} {}", field.name, serde_json::to_string(&field.field_type)?);
    }

    Ok(())
}
