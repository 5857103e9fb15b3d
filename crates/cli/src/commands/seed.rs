//! Catalog seeding command.
//!
//! Inserts the demo product line with variants and starting inventory so a
//! fresh database has something to sell. Intended for development and
//! staging databases; product ids are freshly generated on every run.

use std::collections::HashMap;
use std::sync::Arc;

use streetline_core::{Price, SizeCode};

use streetline_commerce::CommerceError;
use streetline_commerce::catalog::CatalogService;
use streetline_commerce::config::{CommerceConfig, ConfigError};
use streetline_commerce::models::{CreateProductInput, CreateVariantInput};
use streetline_commerce::store::postgres::{self, PostgresStore};

/// Errors that can occur while seeding.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CommerceError),
}

const APPAREL_SIZES: [SizeCode; 5] = [
    SizeCode::S,
    SizeCode::M,
    SizeCode::L,
    SizeCode::Xl,
    SizeCode::Xxl,
];

fn stocked(sizes: &[SizeCode], units: u32) -> HashMap<SizeCode, u32> {
    sizes.iter().map(|&size| (size, units)).collect()
}

fn variant(color: &str, display: Option<&str>, units: u32) -> CreateVariantInput {
    CreateVariantInput {
        color: color.to_string(),
        color_display: display.map(str::to_string),
        inventory: stocked(&APPAREL_SIZES, units),
    }
}

fn demo_products() -> Vec<CreateProductInput> {
    vec![
        CreateProductInput {
            name: "Urban Tech Tee".to_string(),
            description: "Breathable technical tee for everyday wear.".to_string(),
            category: "tshirts".to_string(),
            base_code: "UT".to_string(),
            price: Price::usd_cents(4999),
            sizes: APPAREL_SIZES.to_vec(),
            variants: vec![
                variant("black", None, 25),
                variant("white", None, 25),
                variant("jet black", Some("Jet Black"), 15),
            ],
        },
        CreateProductInput {
            name: "Essential Tee".to_string(),
            description: "The staple tee in heavyweight cotton.".to_string(),
            category: "tshirts".to_string(),
            base_code: "ET".to_string(),
            price: Price::usd_cents(3999),
            sizes: APPAREL_SIZES.to_vec(),
            variants: vec![
                variant("white", None, 40),
                variant("grey", None, 40),
                variant("navy", None, 30),
            ],
        },
        CreateProductInput {
            name: "Street Cargo Pants".to_string(),
            description: "Relaxed-fit cargo pants with utility pockets.".to_string(),
            category: "trousers".to_string(),
            base_code: "SC".to_string(),
            price: Price::usd_cents(8999),
            sizes: APPAREL_SIZES.to_vec(),
            variants: vec![
                variant("olive green", Some("Olive Green"), 20),
                variant("black", None, 20),
            ],
        },
        CreateProductInput {
            name: "Tech Cargo Joggers".to_string(),
            description: "Tapered joggers in water-resistant ripstop.".to_string(),
            category: "trousers".to_string(),
            base_code: "TC".to_string(),
            price: Price::usd_cents(7999),
            sizes: APPAREL_SIZES.to_vec(),
            variants: vec![variant("charcoal", None, 30), variant("sand", None, 20)],
        },
        CreateProductInput {
            name: "Retro Shades".to_string(),
            description: "Squared acetate frames with UV400 lenses.".to_string(),
            category: "glasses".to_string(),
            base_code: "RS".to_string(),
            price: Price::usd_cents(12999),
            sizes: vec![SizeCode::M],
            variants: vec![
                CreateVariantInput {
                    color: "tortoise shell".to_string(),
                    color_display: Some("Tortoise Shell".to_string()),
                    inventory: stocked(&[SizeCode::M], 50),
                },
                CreateVariantInput {
                    color: "black".to_string(),
                    color_display: None,
                    inventory: stocked(&[SizeCode::M], 50),
                },
            ],
        },
        CreateProductInput {
            name: "Aviator Glasses".to_string(),
            description: "Classic metal-frame aviators.".to_string(),
            category: "glasses".to_string(),
            base_code: "AV".to_string(),
            price: Price::usd_cents(10999),
            sizes: vec![SizeCode::M],
            variants: vec![CreateVariantInput {
                color: "gold".to_string(),
                color_display: None,
                inventory: stocked(&[SizeCode::M], 60),
            }],
        },
    ]
}

/// Seed the catalog with the demo product line.
///
/// # Errors
///
/// Returns [`SeedError`] if configuration is missing, the database is
/// unreachable, or a product insert fails.
pub async fn run() -> Result<(), SeedError> {
    dotenvy::dotenv().ok();

    let config = CommerceConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = postgres::create_pool(&config.database_url).await?;
    let catalog = CatalogService::new(Arc::new(PostgresStore::new(pool)));

    for input in demo_products() {
        let name = input.name.clone();
        let product = catalog.create_product(input).await?;
        tracing::info!(
            product = %product.id,
            variants = product.variants.len(),
            "seeded {name}"
        );
    }

    tracing::info!("Catalog seeding complete!");
    Ok(())
}
