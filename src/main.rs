use anyhow::Result;
use clap::{Parser, Subcommand};
use item_search::{
    open_repository, AppConfig, Item, MetricAggregation, NativeQuery, PageRequest, Query, Sort,
    TermsAggregation,
};
use log::info;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "item-search")]
#[command(about = "Index and query catalogue items in a search engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index with its mapping if it does not exist
    CreateIndex,

    /// Drop the index
    DeleteIndex,

    /// Save (insert or overwrite) a single item
    Save {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        title: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        brand: String,
        #[arg(long)]
        price: f64,
        #[arg(long, default_value = "")]
        image_url: String,
    },

    /// Save the built-in sample catalogue in one batch
    SaveSamples,

    /// Fetch one item by id
    Get { id: i64 },

    /// List every item
    FindAll,

    /// Items priced between MIN and MAX, inclusive
    PriceBetween { min: f64, max: f64 },

    /// Full-text match on one field
    Search {
        #[arg(long, default_value = "title")]
        field: String,
        text: String,
    },

    /// One page of a match query, optionally sorted
    Page {
        #[arg(long, default_value = "title")]
        field: String,
        /// Matches everything when omitted
        text: Option<String>,
        #[arg(long, default_value_t = 0)]
        page: usize,
        #[arg(long, default_value_t = 10)]
        size: usize,
        /// FIELD:asc or FIELD:desc, repeatable
        #[arg(long, value_parser = parse_sort)]
        sort: Vec<Sort>,
    },

    /// Bucket items by a keyword field with the average of a numeric field
    Aggregate {
        #[arg(long, default_value = "brand")]
        field: String,
        #[arg(long, default_value = "price")]
        metric_field: String,
        #[arg(long, default_value_t = 10)]
        size: usize,
    },

    /// Number of indexed items
    Count,

    /// Delete one item by id
    Delete { id: i64 },

    /// Delete every item, keeping the index
    DeleteAll,
}

fn parse_sort(arg: &str) -> Result<Sort, String> {
    let (field, order) = arg.split_once(':').unwrap_or((arg, "asc"));
    if field.is_empty() {
        return Err(format!("missing sort field in '{}'", arg));
    }
    Ok(Sort {
        field: field.to_string(),
        order: order.parse()?,
    })
}

fn sample_items() -> Vec<Item> {
    vec![
        Item::new(1, "Xiaomi 11", "phone", "Xiaomi", 3999.0, "http://www.xiaomi.com"),
        Item::new(2, "Xiaomi MIX3", "phone", "Xiaomi", 3299.0, "http://www.xiaomi.com"),
        Item::new(3, "Huawei Mate40", "phone", "Huawei", 5499.0, "http://www.huawei.com"),
        Item::new(4, "Xiaomi TV 4A", "tv", "Xiaomi", 1999.0, "http://www.xiaomi.com"),
        Item::new(5, "Huawei Smart Screen", "tv", "Huawei", 4299.0, "http://www.huawei.com"),
    ]
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::new()?;

    // Initialize env_logger based on config.log_level
    env_logger::Builder::new()
        .filter_level(config.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    info!("Starting item-search with {:?} backend", config.engine);
    let repository = open_repository(&config)?;

    match cli.command {
        Commands::CreateIndex => {
            let created = repository.create_index().await?;
            repository.put_mapping().await?;
            info!("Index '{}' ready (created: {})", config.index_name, created);
        }
        Commands::DeleteIndex => {
            let deleted = repository.delete_index().await?;
            info!("Index '{}' deleted: {}", config.index_name, deleted);
        }
        Commands::Save {
            id,
            title,
            category,
            brand,
            price,
            image_url,
        } => {
            let item = Item::new(id, title, category, brand, price, image_url);
            repository.save(&item).await?;
            print_json(&item)?;
        }
        Commands::SaveSamples => {
            let response = repository.save_all(&sample_items()).await?;
            print_json(&response)?;
        }
        Commands::Get { id } => print_json(&repository.find_by_id(id).await?)?,
        Commands::FindAll => print_json(&repository.find_all().await?)?,
        Commands::PriceBetween { min, max } => {
            print_json(&repository.find_by_price_between(min, max).await?)?
        }
        Commands::Search { field, text } => {
            print_json(&repository.search(&Query::matching(field, text)).await?)?
        }
        Commands::Page {
            field,
            text,
            page,
            size,
            sort,
        } => {
            let query = match text {
                Some(text) => Query::matching(field, text),
                None => Query::MatchAll,
            };
            let mut builder = NativeQuery::builder()
                .query(query)
                .pageable(PageRequest::of(page, size));
            for s in sort {
                builder = builder.sort(s);
            }
            let result = repository.search_page(&builder.build()).await?;
            info!(
                "Page {} of {} ({} items in total)",
                result.number + 1,
                result.total_pages(),
                result.total_elements
            );
            print_json(&result)?;
        }
        Commands::Aggregate {
            field,
            metric_field,
            size,
        } => {
            let query = NativeQuery::builder()
                .aggregation(
                    TermsAggregation::new("group_by", field)
                        .size(size)
                        .sub_aggregation(MetricAggregation::avg("avg", metric_field)),
                )
                .without_hits()
                .build();
            let result = repository.search_page(&query).await?;
            if let Some(terms) = result.aggregations.as_ref().and_then(|a| a.terms("group_by")) {
                for bucket in &terms.buckets {
                    info!(
                        "{}: {} items, average {:?}",
                        bucket.key,
                        bucket.doc_count,
                        bucket.metric("avg")
                    );
                }
            }
            print_json(&result.aggregations)?;
        }
        Commands::Count => print_json(&repository.count().await?)?,
        Commands::Delete { id } => print_json(&repository.delete_by_id(id).await?)?,
        Commands::DeleteAll => {
            repository.delete_all().await?;
            info!("All items deleted from '{}'", config.index_name);
        }
    }

    Ok(())
}
