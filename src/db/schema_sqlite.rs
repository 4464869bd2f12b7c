diesel::table! {
    bridge_pairs (id) {
        id -> Integer,
        discord_channel_id -> Text,
        discord_guild_id -> Text,
        fluxer_channel_id -> Text,
        fluxer_guild_id -> Nullable<Text>,
        discord_webhook_id -> Nullable<Text>,
        discord_webhook_token -> Nullable<Text>,
        fluxer_webhook_id -> Nullable<Text>,
        fluxer_webhook_token -> Nullable<Text>,
        is_active -> Bool,
        sync_uploads -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    message_mappings (id) {
        id -> Integer,
        pair_id -> Integer,
        source_platform -> Text,
        source_message_id -> Text,
        dest_platform -> Text,
        dest_message_id -> Text,
        created_at -> Text,
    }
}
