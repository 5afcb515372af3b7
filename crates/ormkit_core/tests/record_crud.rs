use ormkit_core::{
    open_db_in_memory, Environment, Field, ModelDefinition, OrmError, Registry, SqliteConnection,
    Value,
};

fn registry() -> Registry {
    let mut builder = Registry::builder();
    builder
        .register(
            ModelDefinition::new("res.partner")
                .with_field("name", Field::text("Name").with_help("Display name"))
                .with_field("age", Field::integer("Age"))
                .with_field("credit", Field::float("Credit Limit"))
                .with_field("active", Field::boolean("Active"))
                .with_field(
                    "kind",
                    Field::selection("Kind", [("person", "Person"), ("company", "Company")]),
                )
                .with_field("parent_id", Field::reference("Parent", "res.company")),
        )
        .unwrap()
        .register(ModelDefinition::new("res.company").with_field("name", Field::text("Name")))
        .unwrap();
    builder.build().unwrap()
}

fn setup(registry: &Registry) -> SqliteConnection {
    let conn = open_db_in_memory().unwrap();
    Environment::new(registry, &conn).materialize_schema().unwrap();
    conn
}

#[test]
fn create_then_fetch_round_trips_stored_values() {
    let registry = registry();
    let conn = setup(&registry);
    let env = Environment::new(&registry, &conn);
    let companies = env.model("res.company").unwrap();
    let partners = env.model("res.partner").unwrap();

    let company = companies.create(&[("name", Value::from("Acme"))]).unwrap();
    let created = partners
        .create(&[
            ("name", Value::from("Ada")),
            ("age", Value::from(36)),
            ("credit", Value::from(1200.5)),
            ("active", Value::from(true)),
            ("kind", Value::from("person")),
            ("parent_id", Value::from(company.id())),
        ])
        .unwrap();

    let fetched = partners.fetch(created.id()).unwrap().unwrap();
    assert_eq!(fetched, created);
    assert_eq!(fetched.value("name"), Some(&Value::from("Ada")));
    assert_eq!(fetched.value("age"), Some(&Value::Integer(36)));
    assert_eq!(fetched.value("credit"), Some(&Value::Float(1200.5)));
    assert_eq!(fetched.value("active"), Some(&Value::Bool(true)));
    assert_eq!(fetched.value("kind"), Some(&Value::from("person")));
    assert_eq!(fetched.get_value(&env, "id").unwrap(), Value::Integer(created.id()));

    let parent = fetched.reference(&env, "parent_id").unwrap().unwrap();
    assert_eq!(parent.value("name"), Some(&Value::from("Acme")));
}

#[test]
fn omitted_fields_read_back_as_null() {
    let registry = registry();
    let conn = setup(&registry);
    let env = Environment::new(&registry, &conn);
    let partners = env.model("res.partner").unwrap();

    let created = partners.create(&[("name", Value::from("Bob"))]).unwrap();
    assert_eq!(created.get_value(&env, "age").unwrap(), Value::Null);
    assert!(created.reference(&env, "parent_id").unwrap().is_none());

    let empty = partners.create(&[]).unwrap();
    assert_eq!(empty.value("name"), Some(&Value::Null));
}

#[test]
fn unknown_and_identifier_keys_are_ignored() {
    let registry = registry();
    let conn = setup(&registry);
    let env = Environment::new(&registry, &conn);
    let partners = env.model("res.partner").unwrap();

    let created = partners
        .create(&[
            ("id", Value::from(99)),
            ("name", Value::from("Eve")),
            ("nickname", Value::from("e")),
        ])
        .unwrap();

    assert_eq!(created.id(), 1);
    assert_eq!(created.value("name"), Some(&Value::from("Eve")));
    assert!(created.value("nickname").is_none());
    assert!(matches!(
        created.get(&env, "nickname"),
        Err(OrmError::UnknownField { field, .. }) if field == "nickname"
    ));
}

#[test]
fn mistyped_values_fail_before_any_row_is_written() {
    let registry = registry();
    let conn = setup(&registry);
    let env = Environment::new(&registry, &conn);
    let partners = env.model("res.partner").unwrap();

    assert!(matches!(
        partners.create(&[("age", Value::from("old"))]),
        Err(OrmError::InvalidValue { field, .. }) if field == "age"
    ));
    assert!(matches!(
        partners.create(&[("kind", Value::from("robot"))]),
        Err(OrmError::InvalidValue { field, .. }) if field == "kind"
    ));

    let created = partners.create(&[("credit", Value::from(10))]).unwrap();
    assert_eq!(created.value("credit"), Some(&Value::Float(10.0)));
    assert_eq!(created.id(), 1);
}

#[test]
fn dangling_reference_is_a_storage_failure() {
    let registry = registry();
    let conn = setup(&registry);
    let env = Environment::new(&registry, &conn);
    let partners = env.model("res.partner").unwrap();

    let err = partners
        .create(&[("name", Value::from("Orphan")), ("parent_id", Value::from(42))])
        .unwrap_err();
    assert!(matches!(err, OrmError::Db(_)));
    assert!(partners
        .search(&ormkit_core::Domain::new())
        .unwrap()
        .is_empty());
}

#[test]
fn fetch_handles_missing_duplicate_and_empty_identifiers() {
    let registry = registry();
    let conn = setup(&registry);
    let env = Environment::new(&registry, &conn);
    let companies = env.model("res.company").unwrap();

    for name in ["A", "B", "C"] {
        companies.create(&[("name", Value::from(name))]).unwrap();
    }

    assert!(companies.fetch(10).unwrap().is_none());
    assert!(companies.fetch_many(&[]).unwrap().is_empty());

    let ids: Vec<i64> = companies
        .fetch_many(&[3, 1, 3, 10])
        .unwrap()
        .iter()
        .map(|record| record.id())
        .collect();
    assert_eq!(ids, vec![1, 3]);
}

#[test]
fn write_updates_row_and_instance() {
    let registry = registry();
    let conn = setup(&registry);
    let env = Environment::new(&registry, &conn);
    let partners = env.model("res.partner").unwrap();

    let mut partner = partners
        .create(&[("name", Value::from("Ada")), ("age", Value::from(36))])
        .unwrap();
    partners
        .write(
            &mut partner,
            &[("age", Value::from(37)), ("unknown", Value::from(1))],
        )
        .unwrap();

    assert_eq!(partner.value("age"), Some(&Value::Integer(37)));
    assert_eq!(partner.value("name"), Some(&Value::from("Ada")));
    assert_eq!(partners.fetch(partner.id()).unwrap().unwrap(), partner);
}

#[test]
fn delete_removes_row_and_invalidates_instance() {
    let registry = registry();
    let conn = setup(&registry);
    let env = Environment::new(&registry, &conn);
    let partners = env.model("res.partner").unwrap();

    let mut partner = partners.create(&[("name", Value::from("Gone"))]).unwrap();
    let id = partner.id();
    partners.delete(&mut partner).unwrap();

    assert!(partner.is_deleted());
    assert!(partners.fetch(id).unwrap().is_none());
    assert!(matches!(
        partner.get(&env, "name"),
        Err(OrmError::RecordDeleted { id: deleted, .. }) if deleted == id
    ));
    assert!(matches!(
        partners.write(&mut partner, &[("name", Value::from("Back"))]),
        Err(OrmError::RecordDeleted { .. })
    ));
    assert!(matches!(
        partners.delete(&mut partner),
        Err(OrmError::RecordDeleted { .. })
    ));
}

#[test]
fn handles_reject_records_of_other_models() {
    let registry = registry();
    let conn = setup(&registry);
    let env = Environment::new(&registry, &conn);
    let partners = env.model("res.partner").unwrap();
    let companies = env.model("res.company").unwrap();

    let mut company = companies.create(&[("name", Value::from("Acme"))]).unwrap();
    assert!(matches!(
        partners.write(&mut company, &[("name", Value::from("x"))]),
        Err(OrmError::ModelMismatch { expected, actual })
            if expected == "res.partner" && actual == "res.company"
    ));
}

#[test]
fn unknown_model_is_reported() {
    let registry = registry();
    let conn = setup(&registry);
    let env = Environment::new(&registry, &conn);

    assert!(matches!(
        env.model("sale.order"),
        Err(OrmError::UnknownModel(name)) if name == "sale.order"
    ));
}

#[test]
fn records_export_plain_values_as_json() {
    let registry = registry();
    let conn = setup(&registry);
    let env = Environment::new(&registry, &conn);
    let partners = env.model("res.partner").unwrap();

    let partner = partners
        .create(&[("name", Value::from("Ada")), ("active", Value::from(false))])
        .unwrap();
    let json = serde_json::to_value(partner.to_values()).unwrap();

    assert_eq!(json["id"], serde_json::json!(1));
    assert_eq!(json["name"], serde_json::json!("Ada"));
    assert_eq!(json["active"], serde_json::json!(false));
    assert_eq!(json["age"], serde_json::Value::Null);
}
