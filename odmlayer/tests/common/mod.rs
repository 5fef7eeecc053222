#![allow(dead_code)]

use odmlayer::{
    bson::oid::ObjectId,
    memory::InMemoryStore,
    prelude::*,
};
use serde::{Deserialize, Serialize};

pub static PRODUCER: Schema = Schema::new("Producer", &[FieldSchema::new("name", FieldKind::String)]);

pub static MOVIE: Schema = Schema::new("Movie", &[
    FieldSchema::new("name", FieldKind::String),
    FieldSchema::new("year", FieldKind::Integer),
    FieldSchema::new("language", FieldKind::String).nullable(),
    FieldSchema::new("tags", FieldKind::Array(&FieldKind::String)).nullable(),
    FieldSchema::new("producer", FieldKind::Embedded(&PRODUCER)).nullable(),
]);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub year: i32,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<Producer>,
}

impl Movie {
    pub fn new(name: &str, year: i32) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            year,
            language: None,
            tags: Vec::new(),
            producer: None,
        }
    }

    pub fn language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn produced_by(mut self, producer: &str) -> Self {
        self.producer = Some(Producer {
            name: producer.to_string(),
        });
        self
    }

    pub fn tagged(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|tag| tag.to_string()).collect();
        self
    }
}

impl Document for Movie {
    fn collection_name() -> &'static str {
        "movies"
    }

    fn schema() -> Schema {
        MOVIE
    }
}

pub async fn empty_store() -> DocumentStore<InMemoryStore> {
    DocumentStore::new(InMemoryStore::builder().build().await.unwrap())
}

/// The four classics every scenario starts from.
pub async fn seeded_store() -> DocumentStore<InMemoryStore> {
    let store = empty_store().await;

    store
        .objects::<Movie>()
        .create_many(vec![
            Movie::new("Gone with the wind", 1939).language("EN").tagged(&["romance", "war"]),
            Movie::new("Casablanca", 1942).language("EN").tagged(&["romance"]),
            Movie::new("The Two Towers", 2002).language("EN").produced_by("Barrie"),
            Movie::new("Downfall", 2004).language("DE").produced_by("Bernd").tagged(&["war"]),
        ])
        .await
        .unwrap();

    store
}

pub fn names(movies: &[Movie]) -> Vec<&str> {
    movies.iter().map(|movie| movie.name.as_str()).collect()
}

pub fn sorted_names(movies: &[Movie]) -> Vec<&str> {
    let mut names = names(movies);
    names.sort_unstable();
    names
}
