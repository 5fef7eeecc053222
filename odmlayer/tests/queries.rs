mod common;

use common::{MOVIE, Movie, empty_store, names, seeded_store, sorted_names};
use odmlayer::{
    bson::{Bson, doc},
    prelude::*,
};

#[tokio::test]
async fn chained_range_filters_narrow_to_one() {
    let store = seeded_store().await;

    let movie = store
        .objects::<Movie>()
        .filter(doc! { "year__gt": 2000 })
        .unwrap()
        .filter(doc! { "year__lt": 2003 })
        .unwrap()
        .get()
        .await
        .unwrap();

    assert_eq!(movie.name, "The Two Towers");
}

#[tokio::test]
async fn list_lookups_select_members() {
    let store = seeded_store().await;
    let movies = store.objects::<Movie>();

    let found = movies
        .filter(doc! { "year__in": [2004, 2002, 1939] })
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(sorted_names(&found), vec!["Downfall", "Gone with the wind", "The Two Towers"]);

    let rest = movies
        .filter(doc! { "year__not_in": [2004, 2002] })
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(sorted_names(&rest), vec!["Casablanca", "Gone with the wind"]);
}

#[tokio::test]
async fn raw_filters_match_lookup_filters() {
    let store = seeded_store().await;
    let movies = store.objects::<Movie>();

    let raw = movies
        .raw(doc! { "year": { "$gt": 2000 } })
        .unwrap()
        .raw(doc! { "year": { "$lt": 2003 } })
        .unwrap()
        .get()
        .await
        .unwrap();

    let lookup = movies
        .filter(doc! { "year__gt": 2000, "year__lt": 2003 })
        .unwrap()
        .get()
        .await
        .unwrap();

    assert_eq!(raw, lookup);
    assert_eq!(
        movies.raw(doc! { "year": { "$gt": 2000 } }).unwrap().state().filter(),
        &[Q::gt("year", 2000).unwrap()]
    );
}

#[tokio::test]
async fn raw_combinators() {
    let store = seeded_store().await;

    let found = store
        .objects::<Movie>()
        .raw(doc! { "$or": [{ "year": 1939 }, { "name": "Downfall" }] })
        .unwrap()
        .all()
        .await
        .unwrap();

    assert_eq!(sorted_names(&found), vec!["Downfall", "Gone with the wind"]);
}

#[tokio::test]
async fn exclude_negates_list_lookups() {
    let store = empty_store().await;
    let movies = store.objects::<Movie>();
    movies
        .create_many(vec![
            Movie::new("Casablanca", 1942).language("EN"),
            Movie::new("Central do Brasil", 1998).language("PT"),
            Movie::new("Downfall", 2004).language("EN"),
        ])
        .await
        .unwrap();

    let found = movies
        .exclude(doc! { "language__in": ["EN"] })
        .unwrap()
        .all()
        .await
        .unwrap();

    assert_eq!(names(&found), vec!["Central do Brasil"]);
}

#[tokio::test]
async fn repeated_excludes_on_one_field_all_apply() {
    let store = seeded_store().await;

    let found = store
        .objects::<Movie>()
        .exclude(doc! { "year__gt": 2000 })
        .unwrap()
        .exclude(doc! { "year__lt": 1940 })
        .unwrap()
        .all()
        .await
        .unwrap();

    assert_eq!(names(&found), vec!["Casablanca"]);
}

#[tokio::test]
async fn later_text_lookup_drops_earlier_case_folding() {
    let store = seeded_store().await;
    let movies = store.objects::<Movie>();

    let found = movies
        .filter(doc! { "name__icontains": "zzz" })
        .unwrap()
        .filter(doc! { "name__contains": "the" })
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(names(&found), vec!["Gone with the wind"]);

    let found = movies
        .filter(doc! { "name__contains": "zzz" })
        .unwrap()
        .filter(doc! { "name__icontains": "the" })
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(sorted_names(&found), vec!["Gone with the wind", "The Two Towers"]);
}

#[tokio::test]
async fn expressions_and_field_refs() {
    let store = seeded_store().await;
    let movies = store.objects::<Movie>();
    let name = MOVIE.field("name").unwrap();
    let year = MOVIE.field("year").unwrap();

    let found = movies
        .filter_expr(name.icontains("THE"))
        .all()
        .await
        .unwrap();
    assert_eq!(sorted_names(&found), vec!["Gone with the wind", "The Two Towers"]);

    let found = movies
        .filter_expr(Q::or_([year.lt(1940).unwrap(), Q::eq("name", "Downfall")]).unwrap())
        .all()
        .await
        .unwrap();
    assert_eq!(sorted_names(&found), vec!["Downfall", "Gone with the wind"]);

    let found = movies
        .filter_expr(Q::not_(year.gte(1942).unwrap()))
        .all()
        .await
        .unwrap();
    assert_eq!(names(&found), vec!["Gone with the wind"]);

    assert!(matches!(year.pattern("^19"), Err(OdmError::FieldDefinition(_))));
    assert!(Q::gt("year", true).is_err());
}

#[tokio::test]
async fn text_lookups() {
    let store = seeded_store().await;
    let movies = store.objects::<Movie>();

    let found = movies.filter(doc! { "name__pattern": "^The" }).unwrap().all().await.unwrap();
    assert_eq!(names(&found), vec!["The Two Towers"]);

    let found = movies.filter(doc! { "name__contains": "wind" }).unwrap().all().await.unwrap();
    assert_eq!(names(&found), vec!["Gone with the wind"]);

    let found = movies.filter(doc! { "name__contains": "." }).unwrap().all().await.unwrap();
    assert!(found.is_empty());

    let found = movies.filter(doc! { "name__neq": "Downfall", "year__gte": 2000 }).unwrap().all().await.unwrap();
    assert_eq!(names(&found), vec!["The Two Towers"]);
}

#[tokio::test]
async fn nested_and_array_lookups() {
    let store = seeded_store().await;
    let movies = store.objects::<Movie>();

    let movie = movies.get_by(doc! { "producer__name": "Bernd" }).await.unwrap();
    assert_eq!(movie.name, "Downfall");

    let found = movies.filter(doc! { "tags": "war" }).unwrap().all().await.unwrap();
    assert_eq!(sorted_names(&found), vec!["Downfall", "Gone with the wind"]);

    let found = movies.filter_expr(Q::exists("producer", false)).count().await.unwrap();
    assert_eq!(found, 2);

    let err = movies.filter(doc! { "budget__gt": 10 }).unwrap_err();
    assert!(matches!(err, OdmError::InvalidField { ref field, .. } if field == "budget"));
}

#[tokio::test]
async fn sort_lookups_and_inversion() {
    let store = seeded_store().await;
    let movies = store.objects::<Movie>();

    let newest = movies.filter(doc! { "year__asc": false }).unwrap().first().await.unwrap();
    assert_eq!(newest.unwrap().name, "Downfall");

    let oldest = movies.sort_lookup(doc! { "year__desc": false }).unwrap().first().await.unwrap();
    assert_eq!(oldest.unwrap().name, "Gone with the wind");

    let window = movies
        .sort("year", SortDirection::Asc)
        .skip(1)
        .limit(2)
        .all()
        .await
        .unwrap();
    assert_eq!(names(&window), vec!["Casablanca", "The Two Towers"]);

    let by_language = movies
        .sort_expr(Q::asc("language"))
        .sort_expr(Q::desc("year"))
        .all()
        .await
        .unwrap();
    assert_eq!(names(&by_language), vec!["Downfall", "The Two Towers", "Casablanca", "Gone with the wind"]);
}

#[tokio::test]
async fn primary_key_aliases() {
    let store = seeded_store().await;
    let movies = store.objects::<Movie>();
    let downfall = movies.get_by(doc! { "name": "Downfall" }).await.unwrap();
    let id = downfall.id.unwrap();

    assert_eq!(movies.get_by(doc! { "id": id }).await.unwrap(), downfall);
    assert_eq!(movies.get_by(doc! { "pk": id }).await.unwrap(), downfall);

    let found = movies.filter(doc! { "pk__in": [id] }).unwrap().all().await.unwrap();
    assert_eq!(names(&found), vec!["Downfall"]);
}

#[tokio::test]
async fn lookup_errors() {
    let store = seeded_store().await;
    let movies = store.objects::<Movie>();

    let err = movies.filter(doc! { "year__between": 1 }).unwrap_err();
    match err {
        OdmError::InvalidOperator { operator, valid } => {
            assert_eq!(operator, "between");
            assert!(valid.contains("gte"));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let err = movies.filter(doc! { "year__in": 2004 }).unwrap_err();
    assert!(matches!(err, OdmError::InvalidLookupValue { .. }));

    let err = movies.where_("this.year > 2000").await.unwrap_err();
    assert!(matches!(err, OdmError::Backend(_)));
}

#[tokio::test]
async fn custom_operator_table() {
    let store = DocumentStore::with_settings(
        odmlayer::memory::InMemoryStore::new(),
        OdmSettings::builder()
            .operator("since", LookupOperator::Gte)
            .without_operator("pattern")
            .build(),
    );
    let movies = store.objects::<Movie>();
    movies
        .create_many(vec![Movie::new("Casablanca", 1942), Movie::new("Downfall", 2004)])
        .await
        .unwrap();

    let found = movies.filter(doc! { "year__since": 2000 }).unwrap().all().await.unwrap();
    assert_eq!(names(&found), vec!["Downfall"]);

    assert!(movies.filter(doc! { "name__pattern": "^C" }).is_err());
}

#[tokio::test]
async fn counting_and_distinct() {
    let store = seeded_store().await;
    let movies = store.objects::<Movie>();

    assert_eq!(movies.count().await.unwrap(), 4);
    assert_eq!(movies.limit(1).skip(1).sort("year", SortDirection::Asc).count().await.unwrap(), 4);
    assert!(movies.filter(doc! { "language": "DE" }).unwrap().exists().await.unwrap());
    assert!(!movies.filter(doc! { "language": "FR" }).unwrap().exists().await.unwrap());

    let languages = movies.distinct_values("language").await.unwrap();
    assert_eq!(languages, vec![Bson::from("EN"), Bson::from("DE")]);

    let tags = movies
        .filter(doc! { "year__lt": 2000 })
        .unwrap()
        .distinct_values("tags")
        .await
        .unwrap();
    assert_eq!(tags, vec![Bson::from("romance"), Bson::from("war")]);
}
