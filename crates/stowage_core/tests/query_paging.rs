use stowage_core::{Customer, DataStore, EntityRef, Predicate, Query, StoreError, StoreOptions, UnitOfWork};
use uuid::Uuid;

const LAST_NAMES: [&str; 5] = ["Hopper", "Lovelace", "Turing", "Liskov", "Knuth"];

#[test]
fn paged_queries_without_sort_are_deterministic() {
    let uow = seeded_uow();
    let query = Query::<Customer>::new().page(0, 2);

    let first = ids(&uow.fetch_page(&query).unwrap().items);
    let second = ids(&uow.fetch_page(&query).unwrap().items);

    assert_eq!(first, second);
    assert_eq!(first, ids_descending(&uow)[..2].to_vec());
}

#[test]
fn page_offset_counts_whole_pages() {
    let uow = seeded_uow();
    let expected = ids_descending(&uow);

    let page = uow.fetch_page(&Query::<Customer>::new().page(1, 2)).unwrap();
    assert_eq!(ids(&page.items), expected[2..4].to_vec());
    assert_eq!(page.total_results, 5);

    let tail = uow.fetch_page(&Query::<Customer>::new().page(2, 2)).unwrap();
    assert_eq!(ids(&tail.items), expected[4..].to_vec());

    let beyond = uow.fetch_page(&Query::<Customer>::new().page(3, 2)).unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total_results, 5);
}

#[test]
fn total_results_counts_filtered_rows_not_page() {
    let uow = seeded_uow();
    let query = Query::<Customer>::new()
        .or(Predicate::like("last_name", "L%"))
        .page(0, 1);

    let page = uow.fetch_page(&query).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.total_results, 2);
}

#[test]
fn minus_prefix_sorts_descending() {
    let uow = seeded_uow();

    let ascending = uow.fetch(&Query::<Customer>::new().order_by("last_name")).unwrap();
    let descending = uow.fetch(&Query::<Customer>::new().order_by("-last_name")).unwrap();

    let mut expected: Vec<&str> = LAST_NAMES.to_vec();
    expected.sort_unstable();
    assert_eq!(last_names(&ascending), expected);
    expected.reverse();
    assert_eq!(last_names(&descending), expected);
}

#[test]
fn explicit_sort_replaces_default_paging_order() {
    let uow = seeded_uow();
    let page = uow
        .fetch_page(&Query::<Customer>::new().order_by("last_name").page(0, 2))
        .unwrap();
    assert_eq!(last_names(&page.items), vec!["Hopper", "Knuth"]);
}

#[test]
fn or_and_and_predicates_combine() {
    let uow = seeded_uow();
    let either = Query::<Customer>::new()
        .or(Predicate::eq("last_name", "Turing".to_string()))
        .or(Predicate::eq("last_name", "Knuth".to_string()))
        .order_by("last_name");
    assert_eq!(last_names(&uow.fetch(&either).unwrap()), vec!["Knuth", "Turing"]);

    let both = Query::<Customer>::new()
        .and(Predicate::like("last_name", "L%"))
        .and(Predicate::ne("last_name", "Liskov".to_string()));
    assert_eq!(last_names(&uow.fetch(&both).unwrap()), vec!["Lovelace"]);
    assert_eq!(uow.count(&both).unwrap(), 1);
    assert!(uow.any(&both).unwrap());
}

#[test]
fn null_checks_and_membership() {
    let uow = seeded_uow();
    let with_email = Query::<Customer>::new().or(Predicate::is_not_null("email"));
    assert_eq!(uow.count(&with_email).unwrap(), 1);

    let none = Query::<Customer>::new().or(Predicate::is_in("last_name", Vec::new()));
    assert_eq!(uow.count(&none).unwrap(), 0);

    let some = Query::<Customer>::new().or(Predicate::is_in(
        "last_name",
        vec!["Hopper".to_string().into(), "Knuth".to_string().into()],
    ));
    assert_eq!(uow.count(&some).unwrap(), 2);
}

#[test]
fn unknown_field_is_rejected() {
    let uow = seeded_uow();
    let err = uow
        .fetch(&Query::<Customer>::new().or(Predicate::eq("nickname", "x".to_string())))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownField { ref field, .. } if field == "nickname"));

    let err = uow.fetch(&Query::<Customer>::new().order_by("-nickname")).unwrap_err();
    assert!(matches!(err, StoreError::UnknownField { .. }));
}

#[test]
fn zero_limit_returns_everything() {
    let uow = seeded_uow();
    let page = uow.fetch_page(&Query::<Customer>::new().page(0, 0)).unwrap();
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.total_results, 5);
}

fn seeded_uow() -> UnitOfWork {
    let uow = DataStore::in_memory(StoreOptions::default())
        .unit_of_work()
        .unwrap();
    for (index, last_name) in LAST_NAMES.iter().enumerate() {
        let mut customer = Customer::new("Test", *last_name);
        if index == 0 {
            customer = customer.with_email("grace@example.com");
        }
        uow.insert(&EntityRef::new(customer)).unwrap();
    }
    uow.save_changes().unwrap();
    uow
}

fn ids(items: &[EntityRef<Customer>]) -> Vec<Uuid> {
    items.iter().map(EntityRef::id).collect()
}

fn ids_descending(uow: &UnitOfWork) -> Vec<Uuid> {
    let mut all = ids(&uow.local::<Customer>().unwrap());
    all.sort_by_key(|id| std::cmp::Reverse(id.hyphenated().to_string()));
    all
}

fn last_names(items: &[EntityRef<Customer>]) -> Vec<String> {
    items
        .iter()
        .map(|customer| customer.borrow().last_name.clone())
        .collect()
}
