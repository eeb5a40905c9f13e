use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tessera_core::model::{
    Block, BlockId, BlockKind, CellValue, Column, ColumnId, Document, DocumentId, Project, Row,
    RowId, Table, TableId,
};
use tessera_core::{Command, plan_batch};

const TIERS: [(&str, u64); 3] = [("small", 4), ("medium", 32), ("large", 256)];

/// `tables` tables of 200 rows; every other table carries a formula column
/// and a document binds to each of them.
fn synthetic_project(tables: u64) -> Project {
    let mut project = Project::new();
    for t in 1..=tables {
        let mut table = Table::new(TableId(t), format!("Table{t}"));
        table.columns.push(Column::value(ColumnId(1), "Qty"));
        if t % 2 == 0 {
            table
                .columns
                .push(Column::formula(ColumnId(2), "Total", "thisRow.Qty * 2"));
        }
        for r in 1..=200 {
            table.rows.push(Row::new(RowId(r)).with(ColumnId(1), CellValue::Number(1.0)));
        }
        project.tables.push(table);
    }
    let mut doc = Document::new(DocumentId(1), "Report");
    for t in (2..=tables).step_by(2) {
        doc.blocks.push(Block::new(
            BlockId(t),
            BlockKind::Variable,
            format!("Table{t}.Total"),
        ));
    }
    project.documents.push(doc);
    project
}

fn value_batch(project: &Project, size: u64) -> Vec<Command> {
    (1..=size)
        .filter_map(|r| {
            Command::set_cell_value(
                project,
                TableId(1),
                RowId(r),
                ColumnId(1),
                CellValue::Number(2.0),
            )
            .ok()
        })
        .collect()
}

fn bench_planner(c: &mut Criterion) {
    let mut group = c.benchmark_group("planner");

    for (name, tables) in TIERS {
        let project = synthetic_project(tables);
        let values = value_batch(&project, 64);
        group.throughput(Throughput::Elements(values.len() as u64));
        group.bench_with_input(BenchmarkId::new("value_edits", name), &values, |b, batch| {
            b.iter(|| black_box(plan_batch(batch, &project)));
        });

        // A rename widens to every formula-bearing table and document.
        let rename = vec![
            Command::rename_column(&project, TableId(2), ColumnId(1), "Count")
                .unwrap_or_else(|_| Command::MoveRow {
                    table: TableId(1),
                    from: 0,
                    to: 0,
                }),
        ];
        group.bench_with_input(BenchmarkId::new("rename_widen", name), &rename, |b, batch| {
            b.iter(|| black_box(plan_batch(batch, &project)));
        });

        let mut added = Table::new(TableId(tables + 1), "Table2");
        added.columns.push(Column::value(ColumnId(1), "Qty"));
        let collision = vec![Command::AddTable {
            index: project.tables.len(),
            table: Box::new(added),
        }];
        group.bench_with_input(
            BenchmarkId::new("name_collision", name),
            &collision,
            |b, batch| b.iter(|| black_box(plan_batch(batch, &project))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_planner);
criterion_main!(benches);
