table! {
    block (hash) {
        hash -> Varchar,
        height -> Int4,
        user -> Nullable<Varchar>,
        found_at -> Timestamp,
        time_started -> Timestamp,
        orphan -> Bool,
        mature -> Bool,
        shares_to_solve -> Nullable<Int8>,
        total_value -> Nullable<Int8>,
        transaction_fees -> Nullable<Int8>,
        donated -> Nullable<Int8>,
        bonus_payed -> Nullable<Int8>,
        bits -> Varchar,
        difficulty_avg -> Nullable<Int4>,
        last_share_id -> Nullable<Int8>,
        processed -> Bool,
        merged_type -> Nullable<Varchar>,
        worker -> Nullable<Varchar>,
    }
}

table! {
    bonus_payout (id) {
        id -> Int4,
        user -> Varchar,
        amount -> Int8,
        locked -> Bool,
        created_at -> Timestamp,
        merged_type -> Nullable<Varchar>,
        transaction_id -> Nullable<Varchar>,
        description -> Nullable<Varchar>,
        blockhash -> Nullable<Varchar>,
    }
}

table! {
    donation_percent (user) {
        user -> Varchar,
        perc -> Float8,
    }
}

table! {
    merge_address (user, merged_type) {
        user -> Varchar,
        merged_type -> Varchar,
        #[sql_name = "merge_address"]
        address -> Nullable<Varchar>,
    }
}

table! {
    payout (id) {
        id -> Int4,
        user -> Varchar,
        amount -> Int8,
        locked -> Bool,
        created_at -> Timestamp,
        merged_type -> Nullable<Varchar>,
        transaction_id -> Nullable<Varchar>,
        blockhash -> Nullable<Varchar>,
        shares -> Nullable<Int8>,
        perc -> Float8,
        perc_applied -> Int8,
    }
}

table! {
    share (id) {
        id -> Int8,
        user -> Varchar,
        shares -> Int4,
    }
}

table! {
    status (user, worker) {
        user -> Varchar,
        worker -> Varchar,
        #[sql_name = "status"]
        report -> Nullable<Text>,
        time -> Timestamp,
    }
}

table! {
    transaction (txid) {
        txid -> Varchar,
        confirmed -> Bool,
        created_at -> Timestamp,
        merged_type -> Nullable<Varchar>,
    }
}

joinable!(block -> share (last_share_id));
joinable!(bonus_payout -> block (blockhash));
joinable!(bonus_payout -> transaction (transaction_id));
joinable!(payout -> block (blockhash));
joinable!(payout -> transaction (transaction_id));

allow_tables_to_appear_in_same_query!(
    block,
    bonus_payout,
    donation_percent,
    merge_address,
    payout,
    share,
    status,
    transaction,
);
