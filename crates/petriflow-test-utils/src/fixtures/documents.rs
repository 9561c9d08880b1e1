//! Specification documents in their serialized form.

/// Id of the specification in [`EXPENSE_CLAIM_YAML`]
pub const EXPENSE_CLAIM: &str = "expense-claim";

/// Expense claim: claims up to 500 are paid automatically, larger ones are
/// rejected and the claimant is notified
pub const EXPENSE_CLAIM_YAML: &str = r#"
id: expense-claim
version: "1"
root_net: claim
nets:
  - id: claim
    input_condition: submitted
    output_condition: settled
    conditions: [approved, rejected]
    tasks:
      - id: assess
        split: xor
        kind: { type: atomic, decomposition: assessment }
      - id: pay
      - id: notify
        kind: { type: atomic, decomposition: notification }
    flows:
      - { source: submitted, target: assess }
      - { source: assess, target: approved, predicate: "amount <= `500`", ordinal: 0 }
      - { source: assess, target: rejected, ordinal: 1, is_default: true }
      - { source: approved, target: pay }
      - { source: pay, target: settled }
      - { source: rejected, target: notify }
      - { source: notify, target: settled }
decompositions:
  - id: assessment
    kind: { type: manual }
    output_params:
      - { name: amount, type: number }
  - id: notification
    kind: { type: manual }
"#;
