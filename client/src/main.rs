fn main() -> anyhow::Result<()> {
    wall::run()
}
