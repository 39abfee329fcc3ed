#![allow(dead_code)]

use schema_migrate::MigrationId;

pub const ACCOUNTS_ID: &str = "4qaxoe6y9o4jgpo";
pub const ACCOUNTS_NAME: &str = "accounts";

pub const CREATED_ACCOUNTS: MigrationId = 1732051822;
pub const RENAMED_USERNAME: MigrationId = 1732051839;
pub const ADDED_IS_ADMIN: MigrationId = 1732052023;
pub const RENAMED_IS_ADMIN: MigrationId = 1732052035;

pub const ALL_ACCOUNTS_MIGRATIONS: [MigrationId; 4] = [
    CREATED_ACCOUNTS,
    RENAMED_USERNAME,
    ADDED_IS_ADMIN,
    RENAMED_IS_ADMIN,
];

pub const EMAIL_FIELD_ID: &str = "x3p8pzcm";
pub const PASSWORD_FIELD_ID: &str = "6vz0ekeq";
pub const IS_ADMIN_FIELD_ID: &str = "lsn4l9i3";
