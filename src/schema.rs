// Diesel table definitions. Kept in sync with repository/schema.sql.

diesel::table! {
    watches (id) {
        id -> Text,
        org_id -> Text,
        name -> Text,
        url -> Text,
        schema_type -> Text,
        extraction_rules -> Text,
        schedule -> Text,
        identity_fields -> Text,
        status -> Text,
        next_run_at -> Text,
        consecutive_failures -> Integer,
        created_at -> Text,
        updated_at -> Text,
        deleted_at -> Nullable<Text>,
    }
}

diesel::table! {
    watch_runs (id) {
        id -> Text,
        org_id -> Text,
        watch_id -> Text,
        status -> Text,
        started_at -> Text,
        completed_at -> Nullable<Text>,
        entities_found -> Nullable<Integer>,
        entities_new -> Nullable<Integer>,
        entities_changed -> Nullable<Integer>,
        entities_removed -> Nullable<Integer>,
        events_emitted -> Nullable<Integer>,
        error_message -> Nullable<Text>,
    }
}

diesel::table! {
    entities (id) {
        id -> Text,
        org_id -> Text,
        watch_id -> Text,
        schema_type -> Text,
        external_id -> Text,
        content -> Text,
        status -> Text,
        first_seen_at -> Text,
        last_seen_at -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    events (id) {
        id -> Text,
        org_id -> Text,
        event_type -> Text,
        watch_id -> Text,
        watch_run_id -> Nullable<Text>,
        entity_id -> Nullable<Text>,
        payload -> Text,
        occurred_at -> Text,
    }
}

diesel::table! {
    subscriptions (id) {
        id -> Text,
        org_id -> Text,
        name -> Text,
        event_types -> Text,
        watch_id -> Nullable<Text>,
        filters -> Text,
        channel_type -> Text,
        channel_config -> Text,
        status -> Text,
        created_at -> Text,
        updated_at -> Text,
        deleted_at -> Nullable<Text>,
    }
}

diesel::table! {
    deliveries (id) {
        id -> Text,
        org_id -> Text,
        event_id -> Text,
        subscription_id -> Text,
        status -> Text,
        attempts -> Integer,
        max_attempts -> Integer,
        next_retry_at -> Text,
        last_error -> Nullable<Text>,
        delivered_at -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::joinable!(watch_runs -> watches (watch_id));
diesel::joinable!(entities -> watches (watch_id));
diesel::joinable!(events -> watches (watch_id));
diesel::joinable!(deliveries -> events (event_id));
diesel::joinable!(deliveries -> subscriptions (subscription_id));

diesel::allow_tables_to_appear_in_same_query!(
    watches,
    watch_runs,
    entities,
    events,
    subscriptions,
    deliveries,
);
