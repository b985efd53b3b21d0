use s3tables_query::arn::{BucketReference, TableReference};
use s3tables_query::error::TablesError;

const TABLE_ARN: &str = "arn:aws:s3tables:us-west-2:111122223333:bucket/lake/table/tbl-0001";

#[test]
fn test_parse_table_arn() {
    let table = TableReference::parse(TABLE_ARN).unwrap();

    assert_eq!(table.partition, "aws");
    assert_eq!(table.service, "s3tables");
    assert_eq!(table.region, "us-west-2");
    assert_eq!(table.account_id, "111122223333");
    assert_eq!(table.bucket, "lake");
    assert_eq!(table.table, "tbl-0001");
    assert_eq!(table.as_str(), TABLE_ARN);
    assert_eq!(table.to_string(), TABLE_ARN);
}

#[test]
fn test_parse_trims_whitespace() {
    let table = TableReference::parse(&format!("  {}\n", TABLE_ARN)).unwrap();
    assert_eq!(table.as_str(), TABLE_ARN);
}

#[test]
fn test_other_partitions_are_accepted() {
    let table =
        TableReference::parse("arn:aws-cn:s3tables:cn-north-1:111122223333:bucket/lake/table/t")
            .unwrap();
    assert_eq!(table.partition, "aws-cn");
    assert_eq!(
        table.bucket_arn(),
        "arn:aws-cn:s3tables:cn-north-1:111122223333:bucket/lake"
    );
}

#[test]
fn test_table_bucket_derivation() {
    let table = TableReference::parse(TABLE_ARN).unwrap();

    assert_eq!(
        table.bucket_arn(),
        "arn:aws:s3tables:us-west-2:111122223333:bucket/lake"
    );
    let bucket = table.bucket_ref();
    assert_eq!(bucket, BucketReference::parse(&table.bucket_arn()).unwrap());
    assert_eq!(bucket.to_string(), table.bucket_arn());
}

#[test]
fn test_non_arn_is_rejected() {
    let err = TableReference::parse("s3://lake/orders").unwrap_err();

    assert!(matches!(err, TablesError::Validation { .. }));
    assert!(err.to_string().starts_with("validation: invalid table ARN format"));
    assert!(err.to_string().contains("bucket/<bucket-name>/table/<table-id>"));
}

#[test]
fn test_bucket_arn_is_not_a_table_arn() {
    let err =
        TableReference::parse("arn:aws:s3tables:us-west-2:111122223333:bucket/lake").unwrap_err();
    assert!(err.to_string().contains("invalid table ARN resource format"));
}

#[test]
fn test_wrong_resource_keyword_is_rejected() {
    let err = TableReference::parse("arn:aws:s3tables:us-west-2:1:bucket/lake/view/v1").unwrap_err();
    assert!(err.to_string().contains("resource format"));
}

#[test]
fn test_empty_segments_are_rejected() {
    let err = TableReference::parse("arn:aws:s3tables:us-west-2:1:bucket//table/t").unwrap_err();
    assert!(err.to_string().contains("empty bucket or table segment"));

    let err = TableReference::parse("arn:aws:s3tables:us-west-2:1:bucket/lake/table/").unwrap_err();
    assert!(err.to_string().contains("empty bucket or table segment"));
}

#[test]
fn test_too_few_fields_is_rejected() {
    let err = TableReference::parse("arn:aws:s3tables:us-west-2").unwrap_err();
    assert!(err.to_string().contains("invalid table ARN format"));
}

#[test]
fn test_parse_bucket_arn() {
    let bucket = BucketReference::parse("arn:aws:s3tables:eu-west-1:444455556666:bucket/analytics")
        .unwrap();

    assert_eq!(bucket.region, "eu-west-1");
    assert_eq!(bucket.account_id, "444455556666");
    assert_eq!(bucket.bucket, "analytics");
    assert_eq!(
        bucket.arn(),
        "arn:aws:s3tables:eu-west-1:444455556666:bucket/analytics"
    );
}

#[test]
fn test_bucket_arn_needs_account() {
    let err = BucketReference::parse("arn:aws:s3tables:eu-west-1::bucket/analytics").unwrap_err();
    assert!(err.to_string().contains("has no account id"));
}

#[test]
fn test_table_arn_is_not_a_bucket_arn() {
    let err = BucketReference::parse(TABLE_ARN).unwrap_err();
    assert!(err.to_string().contains("invalid table bucket ARN resource format"));
}

#[test]
fn test_bucket_garbage_is_rejected() {
    let err = BucketReference::parse("lake").unwrap_err();
    assert!(err.to_string().contains("invalid table bucket ARN format"));
}
