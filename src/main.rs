fn main() -> anyhow::Result<()> {
    nonword_scorer_lib::run()
}
